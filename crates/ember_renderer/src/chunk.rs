//! Work partitioning: splitting the image into chunks.
//!
//! Chunks tile the image exactly. Each axis is cut at
//! `floor(i * total / divisions)`, so uneven sizes never leave gaps or
//! overlaps.

use ember_core::{Camera, ChunkStrategy, Color, RendererConfig};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg32;

use crate::query::SceneQuery;
use crate::renderer::render_pixel;

/// A rectangular region of the image to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Index of this chunk in the dispatch order
    pub id: usize,
    /// X coordinate of the chunk's top-left corner
    pub x: u32,
    /// Y coordinate of the chunk's top-left corner
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(id: usize, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { id, x, y, width, height }
    }

    /// A single chunk covering the whole image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, 0, width, height)
    }

    /// Get the total number of pixels in this chunk.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Columns and rows for a near-square grid of about `n` cells.
///
/// Perfect squares give `s x s`; powers of two give `2^ceil(k/2) x 2^floor(k/2)`;
/// anything else is rounded up to the next perfect square.
pub fn grid_dims(n: u32) -> (u32, u32) {
    let n = n.max(1);
    let root = integer_sqrt(n as u64);
    if root * root == n as u64 {
        return (root as u32, root as u32);
    }
    if n.is_power_of_two() {
        let k = n.trailing_zeros();
        return (1 << k.div_ceil(2), 1 << (k / 2));
    }
    // root < 2^16, so the next side still fits
    let side = root as u32 + 1;
    (side, side)
}

fn integer_sqrt(n: u64) -> u64 {
    let mut root = (n as f64).sqrt() as u64;
    while root * root > n {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= n {
        root += 1;
    }
    root
}

/// Boundaries `floor(i * total / divisions)` for `i` in `0..=divisions`.
fn cuts(total: u32, divisions: u32) -> Vec<u32> {
    (0..=divisions)
        .map(|i| (i as u64 * total as u64 / divisions as u64) as u32)
        .collect()
}

/// Split a `width x height` image into chunks.
///
/// Divisions are capped at one per pixel along each axis. Empty chunks are
/// dropped and ids are assigned in row-major order.
pub fn generate_chunks(strategy: ChunkStrategy, n: u32, width: u32, height: u32) -> Vec<Chunk> {
    let pixels = (width as u64 * height as u64).clamp(1, u32::MAX as u64) as u32;
    let n = n.clamp(1, pixels);
    let (columns, rows) = match strategy {
        ChunkStrategy::None => (1, 1),
        ChunkStrategy::VerticalStripes => (n, 1),
        ChunkStrategy::HorizontalStripes => (1, n),
        ChunkStrategy::Grid => grid_dims(n),
    };
    let columns = columns.min(width.max(1));
    let rows = rows.min(height.max(1));

    let xs = cuts(width, columns);
    let ys = cuts(height, rows);

    let mut chunks = Vec::with_capacity(columns as usize * rows as usize);
    for row in ys.windows(2) {
        for column in xs.windows(2) {
            let (w, h) = (column[1] - column[0], row[1] - row[0]);
            if w == 0 || h == 0 {
                continue;
            }
            chunks.push(Chunk::new(chunks.len(), column[0], row[0], w, h));
        }
    }

    chunks
}

/// Shuffle dispatch order with a seeded generator and renumber.
pub fn shuffle_chunks(chunks: &mut [Chunk], seed: u64) {
    let mut rng = Pcg32::seed_from_u64(seed);
    chunks.shuffle(&mut rng);
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.id = i;
    }
}

/// Result of rendering a chunk.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    /// The chunk that was rendered
    pub chunk: Chunk,
    /// Pixel colors in row-major order
    pub pixels: Vec<Color>,
}

/// Render a single chunk.
///
/// Returns pixels in row-major order within the chunk.
pub fn render_chunk<W>(chunk: Chunk, world: &W, camera: &Camera, config: &RendererConfig, pass: u32) -> ChunkResult
where
    W: SceneQuery + ?Sized,
{
    let mut pixels = Vec::with_capacity(chunk.pixel_count());

    for local_y in 0..chunk.height {
        for local_x in 0..chunk.width {
            let color = render_pixel(world, camera, config, pass, chunk.x + local_x, chunk.y + local_y);
            pixels.push(color);
        }
    }

    ChunkResult { chunk, pixels }
}
