/// One bit per frame: set when allocated.
#[derive(Debug, Clone)]
pub struct Bitmap {
    bitmap: Vec<u8>,
    len: usize,
}

impl Bitmap {
    pub fn new(len: usize) -> Bitmap {
        let mut bitmap = Vec::new();
        bitmap.resize(len / 8 + if len % 8 == 0 { 0 } else { 1 }, 0);
        Bitmap { bitmap, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.bitmap[index / 8] & (1 << (index % 8)) != 0
    }

    /// Sets the lowest clear bit and returns its index.
    pub fn allocate(&mut self) -> Option<usize> {
        for i in 0..self.bitmap.len() {
            if self.bitmap[i] == u8::MAX {
                continue;
            }
            for j in 0..8 {
                let index = i * 8 + j;
                if index >= self.len {
                    return None;
                }
                if self.bitmap[i] & (1 << j) == 0 {
                    self.bitmap[i] |= 1 << j;
                    return Some(index);
                }
            }
        }
        None
    }

    pub fn deallocate(&mut self, index: usize) {
        self.bitmap[index / 8] &= !(1 << (index % 8));
    }

    pub fn count_clear(&self) -> usize {
        (0..self.len).filter(|&i| !self.is_set(i)).count()
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::Bitmap;

    #[test]
    fn test_allocate_deallocate() {
        let mut bitmap = Bitmap::new(20);
        let index = bitmap.allocate().unwrap();
        assert_eq!(index, 0);
        bitmap.deallocate(index);
        let index = bitmap.allocate().unwrap();
        assert_eq!(index, 0);

        for i in 1..20 {
            assert_eq!(bitmap.allocate().unwrap(), i);
        }
        assert!(bitmap.allocate().is_none());
        assert_eq!(bitmap.count_clear(), 0);

        bitmap.deallocate(13);
        assert!(!bitmap.is_set(13));
        assert_eq!(bitmap.allocate(), Some(13));
    }

    #[test]
    fn test_length_not_multiple_of_eight() {
        let mut bitmap = Bitmap::new(3);
        assert_eq!(bitmap.allocate(), Some(0));
        assert_eq!(bitmap.allocate(), Some(1));
        assert_eq!(bitmap.allocate(), Some(2));
        assert_eq!(bitmap.allocate(), None);
    }

    #[test]
    fn test_random_allocation_keeps_count() {
        let mut bitmap = Bitmap::new(100);
        let mut rng = rand::thread_rng();
        let mut allocated = Vec::new();
        for _ in 0..rng.gen_range(10..80) {
            allocated.push(bitmap.allocate().unwrap());
        }
        for _ in 0..rng.gen_range(0..allocated.len()) {
            let index = allocated.swap_remove(rng.gen_range(0..allocated.len()));
            bitmap.deallocate(index);
        }
        assert_eq!(bitmap.count_clear(), 100 - allocated.len());
        for index in allocated {
            assert!(bitmap.is_set(index));
        }
    }
}
