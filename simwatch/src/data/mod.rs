mod sample;
mod throttle;

pub use sample::{classify, parse_shape, shape_elements, Image, Sample, SampleInfo, Shaped};
pub use throttle::{ThrottleStep, ThrottleTable};
