//! Fee-convergent coin selection
//!
//! The fee depends on the number of inputs, and the number of inputs depends
//! on how much has to be covered including the fee. [`coin_select`] resolves
//! that circularity iteratively: select greedily for the amount, estimate the
//! fee for the resulting shape, and if the overshoot does not cover the fee
//! restart with the fee added to the target.
//!
//! Inputs are consumed in the order given, which is the cache's oldest-first
//! order. The estimated shape is always one P2PKH input per selected output,
//! one P2PKH destination output and one P2PKH change output.

use bitcoin::Amount;
use thiserror::Error;

use crate::client::UnspentOutput;
use crate::weight::TxWeightEstimator;

/// The available outputs cannot cover the amount plus fee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("not enough outputs to create transaction, need {needed} sat only have {available} sat available")]
pub struct InsufficientFunds {
    pub needed: u64,
    pub available: u64,
}

/// Result of a successful selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Selected outputs in selection order
    pub selected: Vec<UnspentOutput>,
    /// Excess over amount plus fee
    pub change: Amount,
    /// Fee for the estimated shape
    pub fee: Amount,
}

impl Selection {
    /// Sum of the selected amounts
    pub fn total(&self) -> Amount {
        Amount::from_sat(
            self.selected
                .iter()
                .fold(0u64, |sum, u| sum.saturating_add(u.amount.to_sat())),
        )
    }
}

/// Accumulate outputs in order until their sum reaches `needed`
///
/// Returns the sum and the prefix of `unspent` that reached it.
pub fn select_inputs(
    needed: u64,
    unspent: &[UnspentOutput],
) -> Result<(u64, &[UnspentOutput]), InsufficientFunds> {
    let mut selected = 0u64;
    for (index, output) in unspent.iter().enumerate() {
        selected = selected.saturating_add(output.amount.to_sat());
        if selected >= needed {
            return Ok((selected, &unspent[..=index]));
        }
    }

    Err(InsufficientFunds {
        needed,
        available: selected,
    })
}

/// Weight-based fee of a transaction spending `inputs` P2PKH outputs with a
/// destination and a change output
pub fn required_fee(inputs: usize, fee_rate_per_weight: u64) -> Amount {
    let mut estimator = TxWeightEstimator::new();
    for _ in 0..inputs {
        estimator.add_p2pkh_input();
    }
    estimator.add_p2pkh_output();
    estimator.add_p2pkh_output();
    estimator.fee(fee_rate_per_weight)
}

/// Select outputs paying `amount` plus the fee at `fee_rate_per_weight`
///
/// # Errors
/// * `InsufficientFunds` with the amount the last round needed and the total
///   of all outputs when the outputs run out
pub fn coin_select(
    fee_rate_per_weight: u64,
    amount: Amount,
    unspent: &[UnspentOutput],
) -> Result<Selection, InsufficientFunds> {
    let target = amount.to_sat();
    let mut needed = target;

    loop {
        let (total, selected) = select_inputs(needed, unspent)?;

        let fee = required_fee(selected.len(), fee_rate_per_weight);
        let overshoot = total - target;

        if overshoot < fee.to_sat() {
            needed = match target.checked_add(fee.to_sat()) {
                Some(needed) => needed,
                None => {
                    return Err(InsufficientFunds {
                        needed: u64::MAX,
                        available: total_of(unspent),
                    })
                }
            };
            continue;
        }

        return Ok(Selection {
            selected: selected.to_vec(),
            change: Amount::from_sat(overshoot - fee.to_sat()),
            fee,
        });
    }
}

fn total_of(unspent: &[UnspentOutput]) -> u64 {
    unspent
        .iter()
        .fold(0u64, |sum, u| sum.saturating_add(u.amount.to_sat()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{OutPoint, Txid};
    use std::str::FromStr;

    fn output(n: u8, sats: u64) -> UnspentOutput {
        let txid = Txid::from_str(&format!("{:064x}", n)).unwrap();
        UnspentOutput::new(OutPoint::new(txid, 0), Amount::from_sat(sats), 6)
    }

    #[test]
    fn test_select_inputs_takes_prefix() {
        let unspent = vec![output(1, 5), output(2, 3), output(3, 10)];
        let (total, selected) = select_inputs(7, &unspent).unwrap();
        assert_eq!(total, 8);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_select_inputs_exhausted() {
        let unspent = vec![output(1, 5), output(2, 3)];
        let err = select_inputs(9, &unspent).unwrap_err();
        assert_eq!(err, InsufficientFunds { needed: 9, available: 8 });
    }

    #[test]
    fn test_zero_rate_has_zero_fee() {
        let unspent = vec![output(1, 5), output(2, 3)];
        let selection = coin_select(0, Amount::from_sat(6), &unspent).unwrap();
        assert_eq!(selection.fee, Amount::ZERO);
        assert_eq!(selection.change, Amount::from_sat(2));
        assert_eq!(selection.selected.len(), 2);
    }

    #[test]
    fn test_restart_adds_inputs_for_fee() {
        // One input: fee = 4 * (10 + 148 + 68) = 904
        // Two inputs: fee = 4 * (10 + 296 + 68) = 1496
        let unspent = vec![output(1, 10_000), output(2, 2_000), output(3, 50_000)];
        let selection = coin_select(1, Amount::from_sat(9_500), &unspent).unwrap();

        assert_eq!(selection.selected.len(), 2);
        assert_eq!(selection.fee, Amount::from_sat(1_496));
        assert_eq!(selection.change, Amount::from_sat(12_000 - 9_500 - 1_496));
    }

    #[test]
    fn test_insufficient_after_fee() {
        let unspent = vec![output(1, 1_000)];
        let err = coin_select(1, Amount::from_sat(500), &unspent).unwrap_err();
        assert_eq!(err.needed, 500 + 904);
        assert_eq!(err.available, 1_000);
    }

    #[test]
    fn test_exact_cover_has_no_change() {
        let unspent = vec![output(1, 1_904)];
        let selection = coin_select(1, Amount::from_sat(1_000), &unspent).unwrap();
        assert_eq!(selection.change, Amount::ZERO);
        assert_eq!(selection.total(), Amount::from_sat(1_904));
    }
}
