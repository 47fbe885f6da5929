pub mod imagery_service;
pub mod import_service;
pub mod media_service;
pub mod notify_service;
pub mod ocr_service;
pub mod scan_service;
pub mod search_service;
pub mod throttle_service;
pub mod timestamp_service;
pub mod watch_service;
