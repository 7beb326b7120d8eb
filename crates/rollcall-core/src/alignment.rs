//! Face alignment: 4-DOF similarity warp onto the ArcFace template.
//!
//! The five detected landmarks are fit to the canonical InsightFace
//! positions by least squares, and the face region is warped into a
//! 112×112 crop for the embedder.

/// Canonical landmark positions for a 112×112 ArcFace input
/// (left eye, right eye, nose, left mouth, right mouth).
const ARCFACE_TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

const CROP_SIZE: usize = 112;

/// Warp a detected face into the canonical 112×112 crop.
pub fn align_face(
    gray: &[u8],
    width: u32,
    height: u32,
    landmarks: &[(f32, f32); 5],
) -> Vec<u8> {
    let matrix = similarity_transform(landmarks, &ARCFACE_TEMPLATE);
    warp_affine(gray, width as usize, height as usize, &matrix, CROP_SIZE)
}

/// Least-squares 4-DOF similarity transform (scale, rotation, translation)
/// mapping `src` points onto `dst` points.
///
/// Returned as the 2×3 row-major matrix [a, -b, tx, b, a, ty].
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Normal equations for the overdetermined system; unknowns [a, b, tx, ty]:
    //   sx*a - sy*b + tx = dx
    //   sy*a + sx*b + ty = dy
    let mut ata = [0.0f32; 16];
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];
        let rows = [[sx, -sy, 1.0, 0.0], [sy, sx, 0.0, 1.0]];
        let rhs = [dx, dy];

        for (row, &b) in rows.iter().zip(rhs.iter()) {
            for j in 0..4 {
                for k in 0..4 {
                    ata[j * 4 + k] += row[j] * row[k];
                }
                atb[j] += row[j] * b;
            }
        }
    }

    let [a, b, tx, ty] = solve_linear4(&ata, &atb);
    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system by Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_linear4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut pivot_row = col;
        for row in (col + 1)..4 {
            if m[row][col].abs() > m[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            // Degenerate landmark geometry; fall back to identity scale.
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }
    x
}

/// Apply the inverse of a 2×3 similarity matrix to fill an output crop,
/// sampling the source bilinearly. Out-of-bounds pixels read as black.
fn warp_affine(
    gray: &[u8],
    src_width: usize,
    src_height: usize,
    matrix: &[f32; 6],
    out_size: usize,
) -> Vec<u8> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // M = [[a, -b], [b, a]]; det = a² + b²
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return vec![0u8; out_size * out_size];
    }
    let ia = a / det;
    let ib = b / det;

    let sample = |x: i32, y: i32| -> f32 {
        if x >= 0 && x < src_width as i32 && y >= 0 && y < src_height as i32 {
            gray[y as usize * src_width + x as usize] as f32
        } else {
            0.0
        }
    };

    let mut out = vec![0u8; out_size * out_size];

    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0) * fx * (1.0 - fy)
                + sample(x0, y0 + 1) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1) * fx * fy;

            out[oy * out_size + ox] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}
