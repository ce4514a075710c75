pub mod caps;
pub mod conv;
pub mod data;
pub mod dtype;
pub mod initializer;
pub mod math;
pub mod model;
pub mod tensor;
pub mod visual;
