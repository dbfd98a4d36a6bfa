pub mod benthospipeline;

pub use benthospipeline::*;
