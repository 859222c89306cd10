/// A `sx × sy` kernel slid over an input plane with a stride and zero
/// padding. Convolution and pooling share its placement arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Window {
    sx: usize,
    sy: usize,
    stride: usize,
    padding: usize,
    in_sx: usize,
    in_sy: usize,
}

impl Window {
    pub fn new(
        sx: usize,
        sy: usize,
        stride: usize,
        padding: usize,
        in_sx: usize,
        in_sy: usize,
    ) -> Self {
        assert!(stride > 0, "window stride must be positive");
        assert!(
            in_sx + 2 * padding >= sx && in_sy + 2 * padding >= sy,
            "{sx}x{sy} window does not fit a padded {in_sx}x{in_sy} input"
        );
        Self {
            sx,
            sy,
            stride,
            padding,
            in_sx,
            in_sy,
        }
    }

    /// Output width and height. Placements that would overhang the padded
    /// input are dropped.
    pub fn out_dims(&self) -> (usize, usize) {
        (
            (self.in_sx + 2 * self.padding - self.sx) / self.stride + 1,
            (self.in_sy + 2 * self.padding - self.sy) / self.stride + 1,
        )
    }

    /// Kernel offsets `(fx, fy)` paired with the input coordinates `(x, y)`
    /// they cover for the placement at output `(ax, ay)`. Taps that land in
    /// the padding are skipped. Row major over the kernel.
    pub fn taps(
        &self,
        ax: usize,
        ay: usize,
    ) -> impl Iterator<Item = ((usize, usize), (usize, usize))> {
        let w = *self;
        let x0 = (ax * w.stride) as isize - w.padding as isize;
        let y0 = (ay * w.stride) as isize - w.padding as isize;
        (0..w.sy)
            .flat_map(move |fy| (0..w.sx).map(move |fx| (fx, fy)))
            .filter_map(move |(fx, fy)| {
                let x = x0 + fx as isize;
                let y = y0 + fy as isize;
                let inside = x >= 0 && y >= 0 && (x as usize) < w.in_sx && (y as usize) < w.in_sy;
                inside.then_some(((fx, fy), (x as usize, y as usize)))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_size_floors_partial_placements() {
        assert_eq!(Window::new(5, 5, 1, 2, 96, 64).out_dims(), (96, 64));
        assert_eq!(Window::new(3, 3, 2, 0, 10, 10).out_dims(), (4, 4));
        assert_eq!(Window::new(2, 2, 2, 0, 7, 5).out_dims(), (3, 2));
    }

    #[test]
    fn taps_skip_padding() {
        let window = Window::new(3, 3, 1, 1, 2, 2);
        let corner: Vec<_> = window.taps(0, 0).collect();
        assert_eq!(
            corner,
            [
                ((1, 1), (0, 0)),
                ((2, 1), (1, 0)),
                ((1, 2), (0, 1)),
                ((2, 2), (1, 1))
            ]
        );

        let strided = Window::new(2, 2, 2, 0, 4, 2);
        let inputs: Vec<_> = strided.taps(1, 0).map(|(_, at)| at).collect();
        assert_eq!(inputs, [(2, 0), (3, 0), (2, 1), (3, 1)]);
    }
}
