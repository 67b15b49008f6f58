use anyhow::Result;

pub fn run(app_id: Option<u64>, bundle_id: Option<String>) -> Result<()> {
    let identity = super::identity_from(app_id, bundle_id)?;
    let store = super::open_store()?;

    let versions = store.list_versions(&identity, None)?;

    println!(
        "{} version{} on record (latest: {})",
        versions.all.len(),
        if versions.all.len() == 1 { "" } else { "s" },
        versions.latest
    );
    for id in &versions.all {
        if *id == versions.latest {
            println!("  {} (latest)", id);
        } else {
            println!("  {}", id);
        }
    }

    Ok(())
}
