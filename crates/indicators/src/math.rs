use rust_decimal::Decimal;

/// Square root by Newton's method. Returns zero for zero or negative input.
pub fn decimal_sqrt(value: Decimal) -> Decimal {
    if value.is_zero() || value < Decimal::ZERO {
        return Decimal::ZERO;
    }
    let mut guess = if value > Decimal::ONE {
        value / Decimal::TWO
    } else {
        Decimal::ONE
    };
    let epsilon = Decimal::new(1, 12);
    for _ in 0..100 {
        let next_guess = (guess + value / guess) / Decimal::TWO;
        let diff = (next_guess - guess).abs();
        guess = next_guess;
        if diff < epsilon {
            break;
        }
    }
    guess
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sqrt_exact_and_small() {
        assert!((decimal_sqrt(dec!(16)) - dec!(4)).abs() < dec!(0.000000001));
        assert!((decimal_sqrt(dec!(0.0004)) - dec!(0.02)).abs() < dec!(0.000000001));
        assert_eq!(decimal_sqrt(Decimal::ZERO), Decimal::ZERO);
        assert_eq!(decimal_sqrt(dec!(-1)), Decimal::ZERO);
    }
}
