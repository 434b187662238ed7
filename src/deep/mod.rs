mod image_encoder;

pub use image_encoder::ImageEncoder;
