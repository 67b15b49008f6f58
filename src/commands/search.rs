use anyhow::Result;

pub fn run(term: String, limit: u32, include_tvos: bool) -> Result<()> {
    println!("Searching for: {}", term);
    println!();

    let store = super::open_store()?;
    let results = store.search(&term, limit, include_tvos)?;

    if results.results.is_empty() {
        println!("No apps found matching '{}'", term);
        return Ok(());
    }

    println!(
        "Found {} app{}:",
        results.count,
        if results.count == 1 { "" } else { "s" }
    );
    for app in &results.results {
        let price = if app.price > 0.0 {
            format!(" [{:.2}]", app.price)
        } else {
            String::new()
        };
        println!(
            "  {} {} ({}) - id {}{}",
            app.name, app.version, app.bundle_id, app.id, price
        );
    }
    println!();

    Ok(())
}
