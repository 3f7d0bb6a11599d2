mod bias_add;
mod resize_bilinear;

pub use bias_add::bias_add;
pub use resize_bilinear::resize_bilinear;
