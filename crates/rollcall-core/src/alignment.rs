//! Face alignment for descriptor extraction.
//!
//! Fits a 4-DOF similarity transform (uniform scale, rotation,
//! translation) from the five detected landmarks to canonical reference
//! positions, then inverse-warps the frame into a 112x112 crop with
//! bilinear sampling.

/// Canonical landmark positions for a 112x112 aligned crop:
/// left eye, right eye, nose, left mouth corner, right mouth corner.
const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Side length of the aligned crop fed to the descriptor network.
pub const ALIGNED_SIZE: usize = 112;

/// A 4-DOF similarity transform:
///
/// ```text
/// | a  -b |         | tx |
/// | b   a | * p  +  | ty |
/// ```
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Similarity = Similarity {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Least-squares fit mapping each `src[i]` onto `dst[i]`.
    ///
    /// With both point sets centered on their means, the scale/rotation
    /// part has the closed form
    ///
    /// ```text
    /// a = sum(sx*dx + sy*dy) / sum(sx^2 + sy^2)
    /// b = sum(sx*dy - sy*dx) / sum(sx^2 + sy^2)
    /// ```
    ///
    /// and the translation re-centers the destination mean. Falls back to
    /// the identity when the source points are degenerate (coincident).
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
        let n = src.len() as f32;
        let (mut sx_mean, mut sy_mean, mut dx_mean, mut dy_mean) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for i in 0..src.len() {
            sx_mean += src[i].0;
            sy_mean += src[i].1;
            dx_mean += dst[i].0;
            dy_mean += dst[i].1;
        }
        sx_mean /= n;
        sy_mean /= n;
        dx_mean /= n;
        dy_mean /= n;

        let mut var = 0.0f32;
        let mut cross_a = 0.0f32;
        let mut cross_b = 0.0f32;
        for i in 0..src.len() {
            let sx = src[i].0 - sx_mean;
            let sy = src[i].1 - sy_mean;
            let dx = dst[i].0 - dx_mean;
            let dy = dst[i].1 - dy_mean;
            var += sx * sx + sy * sy;
            cross_a += sx * dx + sy * dy;
            cross_b += sx * dy - sy * dx;
        }

        if var < 1e-9 {
            return Similarity::IDENTITY;
        }

        let a = cross_a / var;
        let b = cross_b / var;
        Similarity {
            a,
            b,
            tx: dx_mean - (a * sx_mean - b * sy_mean),
            ty: dy_mean - (b * sx_mean + a * sy_mean),
        }
    }

    fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Map a destination point back into source coordinates.
    ///
    /// The 2x2 part of a similarity inverts as its transpose over
    /// `a^2 + b^2`. Returns `None` for a degenerate (zero-scale)
    /// transform.
    fn apply_inverse(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        Some((
            (self.a * dx + self.b * dy) / det,
            (self.a * dy - self.b * dx) / det,
        ))
    }
}

/// Align a detected face to the canonical 112x112 crop.
///
/// `frame` is row-major grayscale. Output pixels that map outside the
/// frame are black.
pub fn align_face(
    frame: &[u8],
    width: u32,
    height: u32,
    landmarks: &[(f32, f32); 5],
) -> Vec<u8> {
    let transform = Similarity::fit(landmarks, &REFERENCE_LANDMARKS);
    warp_to_square(frame, width as usize, height as usize, transform, ALIGNED_SIZE)
}

/// Inverse-warp `frame` through `transform` into an `out_size` square,
/// sampling bilinearly.
fn warp_to_square(
    frame: &[u8],
    src_width: usize,
    src_height: usize,
    transform: Similarity,
    out_size: usize,
) -> Vec<u8> {
    let mut output = vec![0u8; out_size * out_size];

    for oy in 0..out_size {
        for ox in 0..out_size {
            let Some((sx, sy)) = transform.apply_inverse(ox as f32, oy as f32) else {
                continue;
            };

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let sample = |x: i32, y: i32| -> f32 {
                if x >= 0 && (x as usize) < src_width && y >= 0 && (y as usize) < src_height {
                    frame[y as usize * src_width + x as usize] as f32
                } else {
                    0.0
                }
            };

            let value = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            output[oy * out_size + ox] = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    output
}
