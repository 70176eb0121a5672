//! Demonstration of derived stores (single source, tuples, async)

use std::cell::RefCell;
use std::rc::Rc;

use quiver::{derived, derived_async, get, readable, writable, Setter, Subscribable};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Derived Stores Example ===\n");

    // Single source: the aggregator receives the bare value
    println!("1. Deriving from a single store");
    let temperature_celsius = writable(25);
    let temperature_fahrenheit = derived(temperature_celsius.clone(), |c: &i32| c * 9 / 5 + 32);

    println!(
        "   {}°C = {}°F",
        get(&temperature_celsius),
        get(&temperature_fahrenheit)
    );

    println!("\n2. Updating source store");
    temperature_celsius.set(0);
    println!(
        "   {}°C = {}°F",
        get(&temperature_celsius),
        get(&temperature_fahrenheit)
    );

    // Tuple of sources: one aggregation per change
    println!("\n3. Combining two stores");
    let width = writable(10);
    let height = writable(5);
    let area = derived((width.clone(), height.clone()), |(w, h): &(i32, i32)| w * h);

    let _area_subscription = area.subscribe(|a| println!("   [Area] {}", a));

    println!("\n4. Updating one dimension");
    width.set(20);

    println!("\n5. Updating both dimensions");
    width.set(15);
    height.set(8);

    // Chains of derived stores
    println!("\n6. Chaining derivations");
    let base = writable(2);
    let doubled = derived(base.clone(), |n: &i32| n * 2);
    let squared = derived(doubled.clone(), |n: &i32| n * n);

    println!(
        "   Base: {}, Doubled: {}, Squared: {}",
        get(&base),
        get(&doubled),
        get(&squared)
    );
    base.set(5);
    println!(
        "   Base: {}, Doubled: {}, Squared: {}",
        get(&base),
        get(&doubled),
        get(&squared)
    );

    // Async aggregation: the value arrives later through a setter
    println!("\n7. Deferred lookup");
    let pending: Rc<RefCell<Vec<(Setter<String>, u32)>>> = Rc::new(RefCell::new(Vec::new()));
    let user_id = writable(1u32);
    let user_name = {
        let pending = pending.clone();
        derived_async(
            user_id.clone(),
            Some("loading...".to_string()),
            move |id: &u32, set: &Setter<String>| {
                pending.borrow_mut().push((set.clone(), *id));
                let id = *id;
                Some(Box::new(move || println!("   [Lookup] request for user {} retired", id)))
            },
        )
    };

    let _name_subscription = user_name.subscribe(|name| println!("   [User] {}", name));

    println!("\n8. Resolving the request");
    let requests: Vec<_> = pending.borrow_mut().drain(..).collect();
    for (set, id) in requests {
        set.set(format!("user-{}", id));
    }

    println!("\n9. Switching user");
    user_id.set(2);

    // Readable with a start notifier
    println!("\n10. Readable fed while subscribed");
    let counter = readable(0, |set| {
        println!("   [Counter] started");
        set.update(|n| n + 100);
        Some(Box::new(|| println!("   [Counter] stopped")))
    });
    println!("   Counter: {}", get(&counter));

    println!("\n✓ Example complete!");
}
