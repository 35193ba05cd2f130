//! HTTP API handlers

pub mod capture;
pub mod color_display;
pub mod health;
pub mod results;
pub mod sse;
pub mod ui;

pub use capture::capture_routes;
pub use color_display::color_display;
pub use health::health_routes;
pub use results::{latest_result, result_by_id, result_for_image};
pub use sse::event_stream;
pub use ui::serve_index;
