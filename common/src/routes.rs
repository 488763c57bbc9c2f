pub const ROUTE_WS: &str = "/ws";
pub const ROUTE_STATUS: &str = "/api/status";
pub const ROUTE_TOUCH: &str = "/api/touch";

pub const ASSET_INDEX: &str = "/";
pub const ASSET_STYLE: &str = "/style.css";
pub const ASSET_SCRIPT: &str = "/script.js";
pub const ASSET_LIGHT_ICON: &str = "/light-bulb.png";
pub const ASSET_FAN_ICON: &str = "/fan.png";
