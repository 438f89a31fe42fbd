//! File-level utilities built on the encoder and decoder.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::codec::{Decoder, Encoder, FrameType};
use crate::error::{Error, Result};
use crate::schema::EncodingParams;

/// Summary of an SPLV file.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub framerate: f32,
    pub frame_count: u64,
    pub duration: f32,
    pub keyframes: u64,
    pub file_bytes: u64,
    pub params: EncodingParams,
}

/// Read the header and frame table of an SPLV file.
pub fn inspect<P: AsRef<Path>>(path: P) -> Result<FileInfo> {
    let path = path.as_ref();
    let decoder = Decoder::open(path)?;
    let file_bytes = fs::metadata(path).map_err(Error::FileRead)?.len();

    let mut keyframes = 0;
    for idx in 0..decoder.frame_count() {
        if decoder.frame_type(idx)? == FrameType::Key {
            keyframes += 1;
        }
    }

    let (width, height, depth) = decoder.dimensions();
    Ok(FileInfo {
        width,
        height,
        depth,
        framerate: decoder.framerate(),
        frame_count: decoder.frame_count(),
        duration: decoder.duration(),
        keyframes,
        file_bytes,
        params: *decoder.params(),
    })
}

/// Re-encode `inputs` back to back into one file at `output`.
///
/// All inputs must share the dimensions of the first one; its frame rate
/// and encoding parameters are used for the output. On failure the partial
/// output is removed.
pub fn concat<P: AsRef<Path>>(inputs: &[P], output: impl AsRef<Path>) -> Result<u64> {
    let Some(first) = inputs.first() else {
        return Err(Error::invalid_arguments("no input files to concatenate"));
    };

    let first = Decoder::open(first)?;
    let (width, height, depth) = first.dimensions();
    let framerate = first.framerate();
    let params = *first.params();
    drop(first);

    let mut encoder = Encoder::create(output.as_ref(), width, height, depth, framerate, params)?;
    for input in inputs {
        if let Err(err) = append_file(&mut encoder, input.as_ref(), (width, height, depth), framerate) {
            encoder.abort();
            return Err(err);
        }
    }

    let stats = encoder.finish()?;
    log::info!(
        "concatenated {} files into {}: {stats}",
        inputs.len(),
        output.as_ref().display()
    );
    Ok(stats.frame_count as u64)
}

fn append_file(
    encoder: &mut Encoder,
    path: &Path,
    dims: (u32, u32, u32),
    framerate: f32,
) -> Result<()> {
    let mut decoder = Decoder::open(path)?;
    if decoder.dimensions() != dims {
        return Err(Error::invalid_input(format!(
            "{} is {:?} voxels, expected {dims:?}",
            path.display(),
            decoder.dimensions()
        )));
    }
    if (decoder.framerate() - framerate).abs() > 0.1 {
        log::warn!(
            "{} runs at {} fps, output uses {framerate} fps",
            path.display(),
            decoder.framerate()
        );
    }

    for frame in decoder.frames() {
        encoder.encode_frame(&frame?)?;
    }
    Ok(())
}

/// Cut `input` into segments of `seconds` each, written to `out_dir` as
/// `split_0000.splv`, `split_0001.splv`, ...
///
/// Every segment is encoded from scratch, so each one starts with a
/// keyframe. Returns the paths written.
pub fn split(input: impl AsRef<Path>, seconds: f32, out_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    if !(seconds > 0.0) {
        return Err(Error::invalid_arguments(format!(
            "split length must be positive, got {seconds}"
        )));
    }

    let mut decoder = Decoder::open(input.as_ref())?;
    let frames_per_split = (seconds * decoder.framerate()) as u64;
    if frames_per_split == 0 {
        return Err(Error::invalid_arguments(format!(
            "split length {seconds}s is shorter than one frame at {} fps",
            decoder.framerate()
        )));
    }

    let (width, height, depth) = decoder.dimensions();
    let framerate = decoder.framerate();
    let params = *decoder.params();
    let frame_count = decoder.frame_count();
    let num_splits = frame_count.div_ceil(frames_per_split);

    let mut paths = Vec::with_capacity(num_splits as usize);
    let mut frames = decoder.frames();
    for split_idx in 0..num_splits {
        let path = out_dir.as_ref().join(format!("split_{split_idx:04}.splv"));
        let mut encoder = Encoder::create(&path, width, height, depth, framerate, params)?;

        let start = split_idx * frames_per_split;
        let end = (start + frames_per_split).min(frame_count);
        for _ in start..end {
            let result = match frames.next() {
                Some(frame) => frame.and_then(|frame| encoder.encode_frame(&frame)),
                None => Err(Error::Runtime("decoder ran out of frames".into())),
            };
            if let Err(err) = result {
                encoder.abort();
                return Err(err);
            }
        }

        encoder.finish()?;
        paths.push(path);
    }

    log::info!(
        "split {} into {} segments of up to {frames_per_split} frames",
        input.as_ref().display(),
        paths.len()
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Frame, pack_rgb};
    use tempfile::tempdir;

    /// 16^3 voxel frame with a short bar starting at x = `i`.
    fn bar_frame(i: u32) -> Frame {
        let mut frame = Frame::new(2, 2, 2, 1).unwrap();
        for x in i..i + 3 {
            let bx = (x / 8) % 2;
            if frame.brick_at(bx, 1, 0).is_none() {
                frame.reserve_next_brick().unwrap().commit(bx, 1, 0).unwrap();
            }
            frame
                .brick_at_mut(bx, 1, 0)
                .unwrap()
                .set_voxel_filled(x % 8, 2, 3, pack_rgb(i as u8 * 20, 40, 80));
        }
        frame
    }

    fn write_clip(path: &Path, frames: u32, framerate: f32, width: u32) {
        let params = EncodingParams {
            gop_size: 4,
            ..Default::default()
        };
        let mut encoder = Encoder::create(path, width, 16, 16, framerate, params).unwrap();
        for i in 0..frames {
            let mut frame = bar_frame(i % 6);
            if width != 16 {
                frame = Frame::new(width / 8, 2, 2, 0).unwrap();
            }
            encoder.encode_frame(&frame).unwrap();
        }
        encoder.finish().unwrap();
    }

    #[test]
    fn test_inspect() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clip.splv");
        write_clip(&path, 10, 20.0, 16);

        let info = inspect(&path).unwrap();
        assert_eq!((info.width, info.height, info.depth), (16, 16, 16));
        assert_eq!(info.frame_count, 10);
        assert_eq!(info.keyframes, 3);
        assert!((info.duration - 0.5).abs() < 1e-6);
        assert_eq!(info.file_bytes, fs::metadata(&path).unwrap().len());

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["params"]["gop_size"], 4);
    }

    #[test]
    fn test_concat() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.splv");
        let b = dir.path().join("b.splv");
        let out = dir.path().join("out.splv");
        write_clip(&a, 5, 10.0, 16);
        write_clip(&b, 7, 10.0, 16);

        assert_eq!(concat(&[&a, &b], &out).unwrap(), 12);

        let mut decoder = Decoder::open(&out).unwrap();
        assert_eq!(decoder.frame_count(), 12);
        let frames: Vec<Frame> = decoder.frames().collect::<Result<_>>().unwrap();
        // Frame 5 is the first frame of b
        assert_eq!(frames[5].voxel_color(0, 10, 3), Some(pack_rgb(0, 40, 80)));
        assert_eq!(frames[11].num_voxels(), 3);
    }

    #[test]
    fn test_concat_mismatched_dimensions_removes_output() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.splv");
        let b = dir.path().join("b.splv");
        let out = dir.path().join("out.splv");
        write_clip(&a, 3, 10.0, 16);
        write_clip(&b, 3, 10.0, 24);

        let err = concat(&[&a, &b], &out).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!out.exists());

        let none: [&Path; 0] = [];
        assert!(matches!(concat(&none, &out), Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn test_split() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("clip.splv");
        write_clip(&input, 10, 4.0, 16);
        let out_dir = dir.path().join("parts");
        fs::create_dir(&out_dir).unwrap();

        // 1.5s at 4 fps = 6 frames per segment
        let paths = split(&input, 1.5, &out_dir).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0], out_dir.join("split_0000.splv"));

        let first = Decoder::open(&paths[0]).unwrap();
        let mut second = Decoder::open(&paths[1]).unwrap();
        assert_eq!(first.frame_count(), 6);
        assert_eq!(second.frame_count(), 4);
        assert_eq!(second.frame_type(0).unwrap(), FrameType::Key);

        // Segment two starts at original frame 6, a bar at x = 0
        let frame = second.decode_frame(0, &[]).unwrap();
        assert_eq!(frame.voxel_color(0, 10, 3), Some(pack_rgb(0, 40, 80)));
    }

    #[test]
    fn test_split_rejects_short_segments() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("clip.splv");
        write_clip(&input, 2, 4.0, 16);

        assert!(matches!(split(&input, 0.1, dir.path()), Err(Error::InvalidArguments(_))));
        assert!(matches!(split(&input, -1.0, dir.path()), Err(Error::InvalidArguments(_))));
    }
}
