use anyhow::Result;

pub fn run(
    app_id: Option<u64>,
    bundle_id: Option<String>,
    version_ids: Vec<String>,
) -> Result<()> {
    let identity = super::identity_from(app_id, bundle_id)?;
    let store = super::open_store()?;

    let records = store.version_metadata_batch(&identity, &version_ids)?;

    for (version_id, outcome) in records {
        match outcome {
            Ok(record) => {
                println!("{}:", version_id);
                println!("  Version:   {} (build {})", record.display_version, record.build_number);
                println!("  Released:  {}", record.release_date.format("%Y-%m-%d"));
                println!("  Size:      {}", format_size(record.file_size));
                println!("  Bundle:    {}", record.bundle_id);
                println!("  Developer: {}", record.artist_name);
                println!("  Genre:     {}", record.genre);
                println!("  Rating:    {}", record.age_rating);
            }
            Err(e) => {
                println!("{}: unavailable ({})", version_id, e);
            }
        }
        println!();
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * MB;
    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
