use anyhow::Result;

pub fn run() -> Result<()> {
    let store = super::open_store()?;

    let account = store
        .account()
        .map_err(|_| anyhow::anyhow!("Not signed in. Run: ipagrab login"))?;

    println!("Signed in as: {}", account.email);
    println!();
    if !account.name.is_empty() {
        println!("  Name:       {}", account.name);
    }
    match account.country_code() {
        Ok(country) => println!("  Storefront: {} ({})", country, account.store_front),
        Err(_) => println!("  Storefront: {}", account.store_front),
    }
    println!("  Cache:      {}", store.cache_dir().display());

    Ok(())
}
