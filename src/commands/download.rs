use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use ipagrab::ProgressCallback;
use std::path::PathBuf;
use std::sync::Arc;

pub fn run(
    app_id: Option<u64>,
    bundle_id: Option<String>,
    version_id: Option<String>,
    purchase: bool,
    output: Option<String>,
) -> Result<()> {
    let identity = super::identity_from(app_id, bundle_id)?;
    let store = super::open_store()?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        )
        .expect("static progress template")
        .progress_chars("#>-"),
    );

    let progress_bar = bar.clone();
    let progress: ProgressCallback = Arc::new(move |_stage, done, total| {
        if total > 0 && progress_bar.length() != Some(total) {
            progress_bar.set_length(total);
        }
        progress_bar.set_position(done);
    });

    let artifact = store.download(&identity, version_id.as_deref(), purchase, Some(&progress), None)?;
    bar.finish_and_clear();

    println!("✓ Downloaded {}", artifact.file_name);
    println!();
    println!("  Path:  {}", artifact.path.display());
    println!("  Size:  {} bytes", artifact.size);
    println!("  SINFs: {}", artifact.sinf_count);

    if let Some(output) = output {
        let dest = resolve_output(PathBuf::from(output), &artifact.file_name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::copy(&artifact.path, &dest)
            .with_context(|| format!("Failed to copy package to {}", dest.display()))?;
        println!();
        println!("Copied to {}", dest.display());
    }

    Ok(())
}

/// A directory output keeps the cache file name; anything else is the target.
fn resolve_output(output: PathBuf, file_name: &str) -> PathBuf {
    if output.is_dir() {
        output.join(file_name)
    } else {
        output
    }
}
