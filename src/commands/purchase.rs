use anyhow::Result;
use ipagrab::LicenseOutcome;

pub fn run(app_id: Option<u64>, bundle_id: Option<String>) -> Result<()> {
    let identity = super::identity_from(app_id, bundle_id)?;
    let store = super::open_store()?;

    println!("Acquiring license...");

    match store.acquire_license(&identity)? {
        LicenseOutcome::Acquired => {
            println!("✓ License acquired");
        }
        LicenseOutcome::AlreadyOwned => {
            println!("✓ This account already holds a license for the app");
        }
    }

    Ok(())
}
