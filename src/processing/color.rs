/// Replicate grayscale u8 to interleaved RGB u8.
pub fn replicate_gray_to_rgb(gray: &[u8]) -> Vec<u8> {
    gray.iter().flat_map(|&v| [v, v, v]).collect()
}

/// Vertical flip of an interleaved image with `bpp` bytes per pixel.
pub fn vertical_flip(data: &mut [u8], width: usize, height: usize, bpp: usize) {
    let row_bytes = width * bpp;
    let mut temp = vec![0u8; row_bytes];
    for y in 0..height / 2 {
        let top = y * row_bytes;
        let bot = (height - 1 - y) * row_bytes;
        temp.copy_from_slice(&data[top..top + row_bytes]);
        data.copy_within(bot..bot + row_bytes, top);
        data[bot..bot + row_bytes].copy_from_slice(&temp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicate_gray() {
        assert_eq!(replicate_gray_to_rgb(&[1, 200]), vec![1, 1, 1, 200, 200, 200]);
    }

    #[test]
    fn test_vertical_flip_odd_height() {
        // 1x3 RGB
        let mut data = vec![1, 1, 1, 2, 2, 2, 3, 3, 3];
        vertical_flip(&mut data, 1, 3, 3);
        assert_eq!(data, vec![3, 3, 3, 2, 2, 2, 1, 1, 1]);
    }
}
