use std::sync::Arc;

use tracing::error;

use crate::error::AppError;
use crate::state::{AppState, StatusReport};

/// Starts a full directory scan in the background.
pub fn start_import(state: &AppState) -> Result<(), AppError> {
    if state.importer.status().is_running() {
        return Err(AppError::AlreadyRunning);
    }

    let importer = Arc::clone(&state.importer);
    let cancel = state.cancel.clone();
    std::thread::spawn(move || {
        if let Err(e) = importer.scan_directories(&cancel) {
            error!("error importing: {e}");
        }
    });
    Ok(())
}

pub fn get_import_status(state: &AppState) -> StatusReport {
    state.importer.status().snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::test_state;
    use std::time::{Duration, Instant};

    #[test]
    fn test_start_import_runs_in_background() {
        let (state, fx) = test_state();
        std::fs::write(
            fx.dir("phone").join("a.png"),
            crate::services::media_service::tests::png_bytes(1),
        )
        .unwrap();
        let workers = state.importer.start_workers(1, state.cancel.clone());

        start_import(&state).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let report = get_import_status(&state);
            if !report.running && report.count_processed == 1 {
                break;
            }
            assert!(Instant::now() < deadline, "import did not finish");
            std::thread::sleep(Duration::from_millis(50));
        }

        state.cancel.cancel();
        for worker in workers {
            worker.join().unwrap();
        }
    }
}
