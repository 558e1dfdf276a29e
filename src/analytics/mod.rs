pub mod route_info;
pub mod service;
pub mod time;

pub use route_info::{ANALYZED_DIRECTION, RouteInfo, WEEKDAY_NAMES, route_info};
pub use service::{ActiveDays, active_days, resolve_services};
pub use time::{ServiceTime, TimeParseError};
