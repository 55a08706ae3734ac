/// Summed-area tables over a luminance raster, padded with a zero row and column.
pub struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sqsum: Vec<u64>,
}

impl IntegralImage {
    pub fn new(gray: &[u8], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sum = vec![0u64; stride * (height + 1)];
        let mut sqsum = vec![0u64; stride * (height + 1)];

        for y in 0..height {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..width {
                let p = gray[y * width + x] as u64;
                row_sum += p;
                row_sq += p * p;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sqsum[idx] = sqsum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sqsum }
    }

    #[inline]
    fn area(table: &[u64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> u64 {
        let a = table[y * stride + x];
        let b = table[y * stride + x + w];
        let c = table[(y + h) * stride + x];
        let d = table[(y + h) * stride + x + w];
        d + a - b - c
    }

    /// Sum of pixels in `[x, x+w) × [y, y+h)`.
    #[inline]
    pub fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::area(&self.sum, self.stride, x, y, w, h)
    }

    /// Sum of squared pixels in `[x, x+w) × [y, y+h)`.
    #[inline]
    pub fn rect_sqsum(&self, x: usize, y: usize, w: usize, h: usize) -> u64 {
        Self::area(&self.sqsum, self.stride, x, y, w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_sum_matches_brute_force() {
        let (w, h) = (7usize, 5usize);
        let gray: Vec<u8> = (0..w * h).map(|i| (i * 13 % 256) as u8).collect();
        let ii = IntegralImage::new(&gray, w, h);

        let brute = |x: usize, y: usize, rw: usize, rh: usize| -> (u64, u64) {
            let mut s = 0u64;
            let mut sq = 0u64;
            for yy in y..y + rh {
                for xx in x..x + rw {
                    let p = gray[yy * w + xx] as u64;
                    s += p;
                    sq += p * p;
                }
            }
            (s, sq)
        };

        for &(x, y, rw, rh) in &[(0, 0, 7, 5), (1, 1, 3, 2), (6, 4, 1, 1), (2, 0, 4, 5)] {
            let (s, sq) = brute(x, y, rw, rh);
            assert_eq!(ii.rect_sum(x, y, rw, rh), s, "sum at ({x},{y},{rw},{rh})");
            assert_eq!(ii.rect_sqsum(x, y, rw, rh), sq, "sqsum at ({x},{y},{rw},{rh})");
        }
    }

    #[test]
    fn test_empty_rect_is_zero() {
        let gray = vec![255u8; 16];
        let ii = IntegralImage::new(&gray, 4, 4);
        assert_eq!(ii.rect_sum(2, 2, 0, 0), 0);
    }
}
