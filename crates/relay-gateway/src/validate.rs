//! Input validation shared by every privileged endpoint.

/// Base58 alphabet (no `0`, `O`, `I`, `l`), 32-44 chars -- the shape of a Solana token mint.
pub fn is_valid_mint(mint: &str) -> bool {
    const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    (32..=44).contains(&mint.len()) && mint.chars().all(|c| BASE58_ALPHABET.contains(c))
}

pub fn is_valid_slippage_bps(bps: u32) -> bool {
    (1..=500).contains(&bps)
}

/// Buy amounts are capped at 1.0 SOL.
pub fn is_valid_buy_amount(amount_sol: f64) -> bool {
    amount_sol > 0.0 && amount_sol <= 1.0
}

/// Sell percent: `(0, 100]`.
pub fn is_valid_sell_percent(percent: f64) -> bool {
    percent > 0.0 && percent <= 100.0
}

/// Transfer percent: `[1, 100]`.
pub fn is_valid_transfer_percent(percent: f64) -> bool {
    (1.0..=100.0).contains(&percent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_length_bounds() {
        assert!(!is_valid_mint(&"1".repeat(31)));
        assert!(is_valid_mint(&"1".repeat(32)));
        assert!(is_valid_mint(&"1".repeat(44)));
        assert!(!is_valid_mint(&"1".repeat(45)));
    }

    #[test]
    fn mint_rejects_non_base58_chars() {
        assert!(!is_valid_mint(&"0".repeat(32)));
        assert!(!is_valid_mint(&"O".repeat(32)));
    }

    #[test]
    fn slippage_bounds() {
        assert!(!is_valid_slippage_bps(0));
        assert!(is_valid_slippage_bps(1));
        assert!(is_valid_slippage_bps(500));
        assert!(!is_valid_slippage_bps(501));
    }

    #[test]
    fn buy_amount_bounds() {
        assert!(!is_valid_buy_amount(0.0));
        assert!(is_valid_buy_amount(1.0));
        assert!(!is_valid_buy_amount(1.0 + f64::EPSILON * 4.0));
    }

    #[test]
    fn sell_percent_bounds() {
        assert!(!is_valid_sell_percent(0.0));
        assert!(is_valid_sell_percent(100.0));
    }

    #[test]
    fn transfer_percent_bounds() {
        assert!(!is_valid_transfer_percent(0.0));
        assert!(is_valid_transfer_percent(1.0));
        assert!(is_valid_transfer_percent(100.0));
    }
}
