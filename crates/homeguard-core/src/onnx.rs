//! ONNX Runtime session setup and tensor packing shared by the models.

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use std::path::Path;

const INTRA_THREADS: usize = 2;

/// Open a CPU session for `model_path` and log its tensor signature.
pub(crate) fn open_session(model_path: &Path, model: &str) -> ort::Result<Session> {
    let session = Session::builder()?
        .with_intra_threads(INTRA_THREADS)?
        .commit_from_file(model_path)?;

    tracing::info!(
        model,
        path = %model_path.display(),
        inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "onnx session ready"
    );
    Ok(session)
}

/// Output tensor names, in session order.
pub(crate) fn output_names(session: &Session) -> Vec<String> {
    session.outputs().iter().map(|o| o.name().to_string()).collect()
}

/// Write `img` into batch 0 of a NCHW tensor at `(left, top)`, mapping each
/// channel value `p` to `(p - mean) / std`. Pixels falling outside the tensor
/// are dropped.
pub(crate) fn pack_rgb(tensor: &mut Array4<f32>, img: &RgbImage, left: usize, top: usize, mean: f32, std: f32) {
    let (_, _, height, width) = tensor.dim();
    for (x, y, pixel) in img.enumerate_pixels() {
        let (tx, ty) = (left + x as usize, top + y as usize);
        if tx >= width || ty >= height {
            continue;
        }
        for (c, value) in pixel.0.iter().enumerate() {
            tensor[[0, c, ty, tx]] = (*value as f32 - mean) / std;
        }
    }
}
