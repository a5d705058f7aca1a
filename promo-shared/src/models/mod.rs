pub mod offer;
pub mod transition;
