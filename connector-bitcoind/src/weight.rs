//! Transaction weight estimation
//!
//! Weight is accumulated per input and output script class. Non-witness bytes
//! count four weight units each, witness bytes one.

use bitcoin::Amount;

/// Fixed non-witness overhead: version, locktime and the in/out counts
pub const TX_OVERHEAD: usize = 10;

/// Segwit marker and flag bytes
pub const WITNESS_HEADER_SIZE: usize = 2;

/// Weight units per non-witness byte
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Outpoint, script length, signature script and sequence of a P2PKH spend
pub const P2PKH_INPUT_SIZE: usize = 148;

/// Non-witness part of a P2WPKH spend (empty signature script)
pub const P2WPKH_INPUT_SIZE: usize = 41;

/// Item count, signature and public key of a P2WPKH witness
pub const P2WPKH_WITNESS_SIZE: usize = 108;

/// Value, script length and 25 byte script
pub const P2PKH_OUTPUT_SIZE: usize = 34;

/// Value, script length and 22 byte script
pub const P2WPKH_OUTPUT_SIZE: usize = 31;

/// Accumulates the shape of a transaction and reports its weight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxWeightEstimator {
    input_count: usize,
    output_count: usize,
    input_size: usize,
    output_size: usize,
    witness_size: usize,
}

impl TxWeightEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_p2pkh_input(&mut self) -> &mut Self {
        self.input_size += P2PKH_INPUT_SIZE;
        self.input_count += 1;
        self
    }

    pub fn add_p2wpkh_input(&mut self) -> &mut Self {
        self.input_size += P2WPKH_INPUT_SIZE;
        self.witness_size += P2WPKH_WITNESS_SIZE;
        self.input_count += 1;
        self
    }

    pub fn add_p2pkh_output(&mut self) -> &mut Self {
        self.output_size += P2PKH_OUTPUT_SIZE;
        self.output_count += 1;
        self
    }

    pub fn add_p2wpkh_output(&mut self) -> &mut Self {
        self.output_size += P2WPKH_OUTPUT_SIZE;
        self.output_count += 1;
        self
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// Size of the non-witness serialization in bytes
    pub fn base_size(&self) -> usize {
        TX_OVERHEAD + self.input_size + self.output_size
    }

    /// Weight in weight units
    pub fn weight(&self) -> u64 {
        let mut weight = self.base_size() * WITNESS_SCALE_FACTOR;
        if self.witness_size > 0 {
            weight += WITNESS_HEADER_SIZE + self.witness_size;
        }
        weight as u64
    }

    /// Virtual size in vbytes, rounded up
    pub fn vsize(&self) -> u64 {
        let scale = WITNESS_SCALE_FACTOR as u64;
        (self.weight() + scale - 1) / scale
    }

    /// Fee for this shape at `fee_rate_per_weight` smallest units per weight unit
    ///
    /// Saturates at the maximum amount instead of overflowing.
    pub fn fee(&self, fee_rate_per_weight: u64) -> Amount {
        Amount::from_sat(self.weight().saturating_mul(fee_rate_per_weight))
    }
}

/// Weight of a transaction spending `inputs` P2PKH outputs into `outputs` P2PKH outputs
pub fn p2pkh_weight(inputs: usize, outputs: usize) -> u64 {
    let mut estimator = TxWeightEstimator::new();
    for _ in 0..inputs {
        estimator.add_p2pkh_input();
    }
    for _ in 0..outputs {
        estimator.add_p2pkh_output();
    }
    estimator.weight()
}
