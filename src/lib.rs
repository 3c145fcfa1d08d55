pub mod config;
pub mod fetch;
pub mod html;
pub mod normalize;
pub mod pipeline;
pub mod refresh;
pub mod snapshot;
pub mod table;
