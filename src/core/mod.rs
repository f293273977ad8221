pub mod cluster;
pub mod histogram;
pub mod image;
pub mod pipeline;
pub mod similarity;
