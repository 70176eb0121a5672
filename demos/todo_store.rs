//! Demonstration of writable and derived stores managing app state

use quiver::{derived, get, writable, Subscribable};

#[derive(Clone, Debug, PartialEq)]
struct TodoItem {
    id: usize,
    title: String,
    completed: bool,
}

#[derive(Clone, Debug, PartialEq)]
enum TodoFilter {
    All,
    Active,
    Completed,
}

fn add_todo(todos: &[TodoItem], title: &str) -> Vec<TodoItem> {
    let mut next = todos.to_vec();
    next.push(TodoItem {
        id: todos.len(),
        title: title.to_string(),
        completed: false,
    });
    next
}

fn toggle_todo(todos: &[TodoItem], id: usize) -> Vec<TodoItem> {
    todos
        .iter()
        .map(|todo| TodoItem {
            completed: if todo.id == id { !todo.completed } else { todo.completed },
            ..todo.clone()
        })
        .collect()
}

fn print_todos(todos: &[TodoItem]) {
    for todo in todos {
        let status = if todo.completed { "✓" } else { " " };
        println!("   [{}] {}", status, todo.title);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Store Example: Todo App ===\n");

    let todos = writable(Vec::<TodoItem>::new());
    let filter = writable(TodoFilter::All);

    let stats = derived(todos.clone(), |todos: &Vec<TodoItem>| {
        let total = todos.len();
        let completed = todos.iter().filter(|t| t.completed).count();
        (total, total - completed, completed)
    });

    let visible = derived(
        (todos.clone(), filter.clone()),
        |(todos, filter): &(Vec<TodoItem>, TodoFilter)| -> Vec<TodoItem> {
            todos
                .iter()
                .filter(|t| match filter {
                    TodoFilter::All => true,
                    TodoFilter::Active => !t.completed,
                    TodoFilter::Completed => t.completed,
                })
                .cloned()
                .collect()
        },
    );

    println!("1. Setting up subscriber");
    let _stats_subscription = stats.subscribe(|(total, active, completed)| {
        println!(
            "   [Store Update] Total: {}, Active: {}, Completed: {}",
            total, active, completed
        );
    });

    println!("\n2. Adding todos");
    todos.update(|t| add_todo(t, "Learn Rust"));
    todos.update(|t| add_todo(t, "Build reactive library"));
    todos.update(|t| add_todo(t, "Write documentation"));

    println!("\n3. Current todos:");
    print_todos(&get(&todos));

    println!("\n4. Completing first todo");
    todos.update(|t| toggle_todo(t, 0));

    println!("\n5. Waiting for everything to be done");
    let _all_done = todos.conditioned(Vec::new(), |_| println!("   [Conditioned] list is empty"));
    let (total, ..) = get(&stats);
    println!("   {} todos still tracked", total);

    println!("\n6. Completing second todo");
    todos.update(|t| toggle_todo(t, 1));

    println!("\n7. Filtering to show only active todos");
    filter.set(TodoFilter::Active);
    print_todos(&get(&visible));

    println!("\n8. Filtering to show completed todos");
    filter.set(TodoFilter::Completed);
    print_todos(&get(&visible));

    println!("\n9. Clearing the list");
    todos.set(Vec::new());

    println!("\n10. Final statistics:");
    let (total, active, completed) = get(&stats);
    println!("   Total: {}", total);
    println!("   Active: {}", active);
    println!("   Completed: {}", completed);

    println!("\n✓ Example complete!");
}
