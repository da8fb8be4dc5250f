use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Adds a frame progress bar to `multi`, or returns `None` when progress
/// output is disabled.
pub fn create_progress_bar(
    multi: Option<&MultiProgress>,
    total_frames: u64,
    message: &'static str,
) -> Result<Option<ProgressBar>> {
    let Some(multi) = multi else {
        return Ok(None);
    };

    let pb = multi.add(ProgressBar::new(total_frames));
    pb.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}/{len} frames ({percent}%)\n{msg} | elapsed: {elapsed_precise} | ETA: {eta_precise}",
    )?);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message(message);
    Ok(Some(pb))
}

/// Spinner for steps without a known length.
pub fn create_spinner(
    multi: Option<&MultiProgress>,
    message: &'static str,
) -> Result<Option<ProgressBar>> {
    let Some(multi) = multi else {
        return Ok(None);
    };

    let pb = multi.add(ProgressBar::new_spinner());
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message(message);
    Ok(Some(pb))
}
