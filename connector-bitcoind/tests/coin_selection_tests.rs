//! Coin selection scenarios and properties

mod common;

use bitcoin::Amount;
use common::{outpoint, sats};
use connector_bitcoind::client::UnspentOutput;
use connector_bitcoind::coin_select::{coin_select, required_fee, InsufficientFunds};
use connector_bitcoind::weight::p2pkh_weight;
use quickcheck::{Arbitrary, Gen, TestResult};
use quickcheck_macros::quickcheck;

fn unspent(values: &[u64]) -> Vec<UnspentOutput> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| UnspentOutput::new(outpoint(i as u8 + 1, 0), sats(*value), 6))
        .collect()
}

#[test]
fn test_zero_fee_rate_reports_overshoot_as_change() {
    let outputs = unspent(&[5, 3]);

    let selection = coin_select(0, sats(6), &outputs).unwrap();

    assert_eq!(selection.fee, Amount::ZERO);
    assert_eq!(selection.change, sats(8 - 6));
    assert_eq!(selection.selected, outputs);
}

#[test]
fn test_one_short_of_target() {
    let outputs = unspent(&[400, 599]);

    let err = coin_select(0, sats(1_000), &outputs).unwrap_err();

    assert_eq!(err, InsufficientFunds { needed: 1_000, available: 999 });
}

#[test]
fn test_empty_set() {
    let err = coin_select(1, sats(1_000), &[]).unwrap_err();
    assert_eq!(err, InsufficientFunds { needed: 1_000, available: 0 });
}

#[test]
fn test_fee_reflects_selected_input_count() {
    let outputs = unspent(&[3_000, 3_000, 3_000, 100_000]);

    let selection = coin_select(2, sats(7_000), &outputs).unwrap();

    let n = selection.selected.len();
    assert_eq!(selection.fee.to_sat(), p2pkh_weight(n, 2) * 2);
    assert_eq!(selection.fee, required_fee(n, 2));
    assert_eq!(
        selection.total().to_sat(),
        7_000 + selection.fee.to_sat() + selection.change.to_sat()
    );
}

#[test]
fn test_selection_keeps_input_order() {
    let outputs = unspent(&[1_000, 50_000, 2_000]);

    let selection = coin_select(1, sats(1_500), &outputs).unwrap();

    assert_eq!(selection.selected[0].outpoint, outpoint(1, 0));
    assert_eq!(selection.selected[1].outpoint, outpoint(2, 0));
    assert_eq!(selection.selected.len(), 2);
}

#[derive(Clone, Debug)]
struct SelectionCase {
    values: Vec<u64>,
    rate: u64,
    target: u64,
}

impl Arbitrary for SelectionCase {
    fn arbitrary(g: &mut Gen) -> Self {
        let count = usize::arbitrary(g) % 20 + 1;
        let values: Vec<u64> = (0..count).map(|_| u64::arbitrary(g) % 1_000_000 + 1).collect();
        let total: u64 = values.iter().sum();
        SelectionCase {
            values,
            rate: u64::arbitrary(g) % 50,
            target: u64::arbitrary(g) % total + 1,
        }
    }
}

#[quickcheck]
fn selection_covers_amount_plus_fee(case: SelectionCase) -> TestResult {
    let outputs = unspent(&case.values);
    let total: u64 = case.values.iter().sum();

    match coin_select(case.rate, sats(case.target), &outputs) {
        Ok(selection) => {
            let n = selection.selected.len();
            let sum = selection.total().to_sat();
            let fee = selection.fee.to_sat();
            TestResult::from_bool(
                sum >= case.target + fee
                    && selection.change.to_sat() == sum - case.target - fee
                    && fee == p2pkh_weight(n, 2) * case.rate
                    && selection.selected[..] == outputs[..n],
            )
        }
        Err(err) => TestResult::from_bool(err.available == total && err.needed > total),
    }
}
