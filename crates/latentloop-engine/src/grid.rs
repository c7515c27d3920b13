use image::imageops::overlay;
use image::{Rgb, RgbImage};
use latentloop_contracts::config::SearchConfig;
use thiserror::Error;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: usize,
    pub cols: usize,
    pub spacing: u32,
    pub border: u32,
}

impl GridLayout {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            rows: config.rows,
            cols: config.cols,
            spacing: config.grid.spacing,
            border: config.grid.border(),
        }
    }

    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }

    /// Row-major `(row, col)` of the 0-based image `k`.
    pub fn cell_of(&self, k: usize) -> (usize, usize) {
        (k / self.cols, k % self.cols)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("cannot compose a grid from zero images")]
    Empty,
    #[error("grid expects {expected} images, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("border {border} is wider than spacing {spacing}; images would be clipped")]
    BorderExceedsSpacing { border: u32, spacing: u32 },
}

/// Contact sheet of exactly `layout.cells()` images on a white canvas.
/// Cells are sized by the largest image in the batch.
pub fn compose_grid<'a>(
    images: impl IntoIterator<Item = &'a RgbImage>,
    layout: &GridLayout,
) -> Result<RgbImage, GridError> {
    if layout.border > layout.spacing {
        return Err(GridError::BorderExceedsSpacing {
            border: layout.border,
            spacing: layout.spacing,
        });
    }
    let images = images.into_iter().collect::<Vec<&RgbImage>>();
    if images.is_empty() {
        return Err(GridError::Empty);
    }
    if images.len() != layout.cells() {
        return Err(GridError::CountMismatch {
            expected: layout.cells(),
            actual: images.len(),
        });
    }

    let max_width = images.iter().map(|image| image.width()).max().unwrap_or(0);
    let max_height = images.iter().map(|image| image.height()).max().unwrap_or(0);
    let cell_width = max_width + layout.spacing;
    let cell_height = max_height + layout.spacing;
    let mut canvas = RgbImage::from_pixel(
        cell_width * layout.cols as u32,
        cell_height * layout.rows as u32,
        BACKGROUND,
    );

    for (k, image) in images.into_iter().enumerate() {
        let (row, col) = layout.cell_of(k);
        let x = layout.border as i64 + col as i64 * cell_width as i64;
        let y = layout.border as i64 + row as i64 * cell_height as i64;
        overlay(&mut canvas, image, x, y);
    }
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::{compose_grid, GridError, GridLayout};

    fn layout() -> GridLayout {
        GridLayout {
            rows: 4,
            cols: 3,
            spacing: 10,
            border: 2,
        }
    }

    fn tile(k: usize) -> RgbImage {
        RgbImage::from_pixel(20, 16, Rgb([k as u8 * 10, 255 - k as u8, 7]))
    }

    #[test]
    fn places_images_row_major() -> anyhow::Result<()> {
        let tiles = (0..12).map(tile).collect::<Vec<RgbImage>>();
        let grid = compose_grid(&tiles, &layout())?;

        assert_eq!(grid.dimensions(), ((20 + 10) * 3, (16 + 10) * 4));
        for k in 0..12 {
            let (row, col) = layout().cell_of(k);
            let x = 2 + col as u32 * 30 + 10;
            let y = 2 + row as u32 * 26 + 8;
            assert_eq!(*grid.get_pixel(x, y), tile(k).get_pixel(0, 0).to_owned(), "tile {k}");
        }
        // spacing between the first two columns stays background
        assert_eq!(*grid.get_pixel(2 + 20 + 3, 5), Rgb([255, 255, 255]));
        Ok(())
    }

    #[test]
    fn canvas_uses_the_largest_image() -> anyhow::Result<()> {
        let mut tiles = (0..12).map(tile).collect::<Vec<RgbImage>>();
        tiles[4] = RgbImage::from_pixel(50, 40, Rgb([1, 2, 3]));
        let grid = compose_grid(&tiles, &layout())?;
        assert_eq!(grid.dimensions(), ((50 + 10) * 3, (40 + 10) * 4));
        assert_eq!(*grid.get_pixel(2 + 60, 2 + 50), Rgb([1, 2, 3]));
        Ok(())
    }

    #[test]
    fn border_wider_than_spacing_is_rejected() {
        let narrow = GridLayout {
            rows: 1,
            cols: 2,
            spacing: 2,
            border: 20,
        };
        let tiles = vec![RgbImage::new(10, 10), RgbImage::new(10, 10)];
        assert_eq!(
            compose_grid(&tiles, &narrow),
            Err(GridError::BorderExceedsSpacing {
                border: 20,
                spacing: 2
            })
        );
    }

    #[test]
    fn rejects_empty_and_wrong_counts() {
        let none: Vec<RgbImage> = Vec::new();
        assert_eq!(compose_grid(&none, &layout()), Err(GridError::Empty));

        let eleven = (0..11).map(tile).collect::<Vec<RgbImage>>();
        assert_eq!(
            compose_grid(&eleven, &layout()),
            Err(GridError::CountMismatch {
                expected: 12,
                actual: 11
            })
        );
    }
}
