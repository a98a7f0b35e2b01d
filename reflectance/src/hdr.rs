use std::path::Path;

use exr::{
    meta::attribute::{ChannelDescription, SampleType},
    prelude::{write_rgb_file, Image, SpecificChannels, Vec2, WritableImage},
};

use crate::buffer::{BufferError, PixelBuffer, Rg, Rgb, Rgba};

#[derive(Debug, thiserror::Error)]
pub enum HdrError {
    #[error("couldn't decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("couldn't encode exr: {0}")]
    Encode(#[from] exr::error::Error),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Loads any format the image crate knows (exr, hdr, ...) as 4 channel floats.
pub fn read_rgba(path: &Path) -> Result<PixelBuffer<Rgba>, HdrError> {
    let image = image::open(path)?.into_rgba32f();
    log::info!("Loaded file {}", path.display());
    Ok(PixelBuffer::from_rgba_image(&image)?)
}

pub fn write_rgb(path: &Path, buf: &PixelBuffer<Rgb>) -> Result<(), HdrError> {
    let width = buf.width() as usize;
    let pixels = buf.pixels();
    write_rgb_file(path, width, buf.height() as usize, |x, y| {
        let [r, g, b] = pixels[y * width + x];
        (r, g, b)
    })?;
    Ok(())
}

// there's no two channel shortcut in exr, spell out the layer
pub fn write_rg(path: &Path, buf: &PixelBuffer<Rg>) -> Result<(), HdrError> {
    let width = buf.width() as usize;
    let pixels = buf.pixels();
    let channels = SpecificChannels::new(
        (
            ChannelDescription::named("R", SampleType::F32),
            ChannelDescription::named("G", SampleType::F32),
        ),
        |Vec2(x, y): Vec2<usize>| {
            let [r, g] = pixels[y * width + x];
            (r, g)
        },
    );
    Image::from_channels((width, buf.height() as usize), channels)
        .write()
        .to_file(path)?;
    Ok(())
}

/// Reads a lut back as (channel names, pixels).
#[cfg(test)]
pub fn read_rg(path: &Path) -> (Vec<String>, PixelBuffer<Rg>) {
    use exr::image::{read::read_first_flat_layer_from_file, AnyChannel, FlatSamples};

    fn channel<'a>(list: &'a [AnyChannel<FlatSamples>], name: &str) -> &'a [f32] {
        let found = list.iter().find(|c| c.name.to_string() == name).unwrap();
        match &found.sample_data {
            FlatSamples::F32(values) => values,
            _ => panic!("{} isn't stored as f32", name),
        }
    }

    let layer = read_first_flat_layer_from_file(path).unwrap().layer_data;
    let list = &layer.channel_data.list[..];
    let names = list.iter().map(|c| c.name.to_string()).collect::<Vec<_>>();
    let pixels = channel(list, "R")
        .iter()
        .zip(channel(list, "G"))
        .map(|(&r, &g)| [r, g])
        .collect();
    let buf = PixelBuffer::new(layer.size.0 as u32, layer.size.1 as u32, pixels).unwrap();
    (names, buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rgb_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("round_trip.exr");
        let written = PixelBuffer::from_fn(5, 3, |x, y| {
            [x as f32 * 0.25, y as f32 * 10.5, (x + y) as f32 * 1e-3]
        });
        write_rgb(&path, &written).unwrap();

        let read = read_rgba(&path).unwrap();
        assert_eq!(read.width(), 5);
        assert_eq!(read.height(), 3);
        for (a, b) in written.pixels().iter().zip(read.pixels()) {
            assert_relative_eq!(a[0], b[0], max_relative = 1e-6);
            assert_relative_eq!(a[1], b[1], max_relative = 1e-6);
            assert_relative_eq!(a[2], b[2], max_relative = 1e-6);
        }
    }

    #[test]
    fn writes_two_channel_lut() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lut.exr");
        let lut = PixelBuffer::from_fn(4, 4, |x, y| [x as f32 / 4.0, y as f32 / 4.0]);
        write_rg(&path, &lut).unwrap();

        let (mut names, read) = read_rg(&path);
        names.sort();
        assert_eq!(names, ["G", "R"]);
        assert_eq!((read.width(), read.height()), (4, 4));
        for y in 0..4 {
            for x in 0..4 {
                let [r, g] = read.get(x, y).unwrap();
                assert_relative_eq!(r, x as f32 / 4.0);
                assert_relative_eq!(g, y as f32 / 4.0);
            }
        }
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_rgba(&dir.path().join("nope.exr")),
            Err(HdrError::Decode(_))
        ));
    }
}
