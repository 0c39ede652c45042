/// Set bit `bit` of `x` on if `toggle` is true, otherwise off.
pub fn bit(bit: u32, x: u32, toggle: bool) -> u32 {
    if toggle {
        x | (1 << bit)
    } else {
        x & !(1 << bit)
    }
}

/// Test whether bit `bit` of `x` is set.
pub fn test_bit(bit: u32, x: u32) -> bool {
    (x >> bit) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear() {
        let x = bit(3, 0, true);
        assert_eq!(x, 0b1000);
        assert!(test_bit(3, x));
        assert!(!test_bit(2, x));
        assert_eq!(bit(3, x, false), 0);
    }
}
