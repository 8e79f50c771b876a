use image::ImageReader;
use std::io::Cursor;

/// Decode a JPEG (or any format `image` can sniff) to an 8-bit luma raster.
/// Returns `(samples, width, height)`.
pub fn decode_luma(data: &[u8]) -> Result<(Vec<u8>, u32, u32), image::ImageError> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    let gray = img.to_luma8();
    let (width, height) = gray.dimensions();
    Ok((gray.into_raw(), width, height))
}

/// Read the image dimensions from the header without decoding pixels.
pub fn image_dimensions(data: &[u8]) -> Result<(u32, u32), image::ImageError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_dimensions()
}

#[cfg(test)]
pub(crate) fn encode_test_jpeg(samples: &[u8], width: u32, height: u32) -> Vec<u8> {
    let gray = image::GrayImage::from_raw(width, height, samples.to_vec()).unwrap();
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageLuma8(gray)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}
