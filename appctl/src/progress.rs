use std::{
    io::IsTerminal as _,
    sync::{Arc, Mutex},
};

use appliance_update::upload::{ProgressFn, UploadProgress};
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use tracing::info;

/// Renders upload progress. On a terminal each artifact gets a bar; otherwise
/// progress is logged in 10% steps.
pub fn upload_progress() -> ProgressFn {
    let is_interactive = std::io::stderr().is_terminal();
    let bar: Mutex<Option<ProgressBar>> = Mutex::new(None);
    Arc::new(move |p: UploadProgress| {
        let Ok(mut bar) = bar.lock() else { return };
        if is_interactive {
            on_progress_interactive(&mut bar, &p);
        } else {
            on_progress_logged(&p);
        }
    })
}

fn on_progress_interactive(bar: &mut Option<ProgressBar>, p: &UploadProgress) {
    // A new artifact starts over at zero with its own total.
    let restarted = bar
        .as_ref()
        .is_some_and(|b| b.length() != Some(p.total_to_upload) || b.position() > p.bytes_so_far);
    if restarted && let Some(done) = bar.take() {
        done.finish_and_clear();
    }
    let bar = bar.get_or_insert_with(|| {
        let pb = ProgressBar::new(p.total_to_upload);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ) {
            pb.set_style(
                style
                    .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                        let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                    })
                    .progress_chars("#>-"),
            );
        }
        pb
    });
    bar.set_position(p.bytes_so_far);
    if p.bytes_so_far >= p.total_to_upload {
        bar.finish_and_clear();
    }
}

fn on_progress_logged(p: &UploadProgress) {
    if p.total_to_upload == 0 {
        return;
    }
    let pct = (p.bytes_so_far * 100) / p.total_to_upload;
    if pct % 10 == 0 {
        info!(
            "uploaded ({}/{} MiB) {}%",
            p.bytes_so_far >> 20,
            p.total_to_upload >> 20,
            pct,
        );
    }
}
