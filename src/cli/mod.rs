pub mod command;
pub mod defects;
pub mod info;
pub mod output;
pub mod positions;
pub mod progress;
pub mod render;
