//! Proof that a proxy applied its fragment honestly.
//!
//! A Chaum-Pedersen proof of equality of discrete logarithms over three bases:
//! given the fragment's verification key `vk = G·rk` and the partial's points
//! `E₁ = E·rk`, `V₁ = V·rk`, the proxy proves that one `rk` underlies all three
//! without revealing it.
//!
//! The nonce is derived from the secret and the statement, so proving is
//! deterministic and re-encryption needs no randomness source.

use ark_ec::CurveGroup;
use ark_serialize::*;
use zeroize::Zeroize;

use crate::error::PreError;
use crate::security::constant_time_eq_canonical;
use crate::utils::{hash_to_scalar, to_bytes, DST_PROOF_CHALLENGE, DST_PROOF_NONCE};

/// The public values a correctness proof speaks about.
#[derive(Clone, Copy, Debug)]
pub struct Statement<C: CurveGroup> {
    pub verification_key: C,
    pub point_e: C,
    pub point_e1: C,
    pub point_v: C,
    pub point_v1: C,
}

#[derive(CanonicalSerialize, CanonicalDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorrectnessProof<C: CurveGroup> {
    /// Commitment `G·k`
    pub commitment_g: C,
    /// Commitment `E·k`
    pub commitment_e: C,
    /// Commitment `V·k`
    pub commitment_v: C,
    /// Response `k + c·rk`
    pub response: C::ScalarField,
}

impl<C: CurveGroup> Statement<C> {
    fn encode(&self) -> Result<Vec<Vec<u8>>, PreError> {
        Ok(vec![
            to_bytes(&C::generator())?,
            to_bytes(&self.verification_key)?,
            to_bytes(&self.point_e)?,
            to_bytes(&self.point_e1)?,
            to_bytes(&self.point_v)?,
            to_bytes(&self.point_v1)?,
        ])
    }
}

impl<C: CurveGroup> CorrectnessProof<C> {
    fn challenge(
        statement_bytes: &[Vec<u8>],
        commitment_g: &C,
        commitment_e: &C,
        commitment_v: &C,
        context: &[u8],
    ) -> Result<C::ScalarField, PreError> {
        let g_bytes = to_bytes(commitment_g)?;
        let e_bytes = to_bytes(commitment_e)?;
        let v_bytes = to_bytes(commitment_v)?;

        let mut input: Vec<&[u8]> = statement_bytes.iter().map(Vec::as_slice).collect();
        input.extend([g_bytes.as_slice(), e_bytes.as_slice(), v_bytes.as_slice(), context]);
        Ok(hash_to_scalar(DST_PROOF_CHALLENGE, &input))
    }

    /// Proves that `rekey` is the common discrete log in `statement`.
    ///
    /// # Arguments
    /// * `rekey` - The fragment's secret share
    /// * `statement` - Verification key and capsule points before/after
    /// * `context` - Binds the proof to a fragment and capsule
    pub fn prove(
        rekey: &C::ScalarField,
        statement: &Statement<C>,
        context: &[u8],
    ) -> Result<Self, PreError> {
        let statement_bytes = statement.encode()?;

        let mut secret_bytes = to_bytes(rekey)?;
        let mut nonce_input: Vec<&[u8]> = vec![secret_bytes.as_slice()];
        nonce_input.extend(statement_bytes.iter().map(Vec::as_slice));
        nonce_input.push(context);
        let mut nonce: C::ScalarField = hash_to_scalar(DST_PROOF_NONCE, &nonce_input);
        secret_bytes.zeroize();

        let commitment_g = C::generator() * nonce;
        let commitment_e = statement.point_e * nonce;
        let commitment_v = statement.point_v * nonce;

        let c = Self::challenge(
            &statement_bytes,
            &commitment_g,
            &commitment_e,
            &commitment_v,
            context,
        )?;
        let response = nonce + c * rekey;
        nonce.zeroize();

        Ok(CorrectnessProof {
            commitment_g,
            commitment_e,
            commitment_v,
            response,
        })
    }

    /// Verifies the proof against `statement`.
    pub fn verify(&self, statement: &Statement<C>, context: &[u8]) -> bool {
        let Ok(statement_bytes) = statement.encode() else {
            return false;
        };
        let Ok(c) = Self::challenge(
            &statement_bytes,
            &self.commitment_g,
            &self.commitment_e,
            &self.commitment_v,
            context,
        ) else {
            return false;
        };

        let check_g = constant_time_eq_canonical(
            &(C::generator() * self.response),
            &(self.commitment_g + statement.verification_key * c),
        );
        let check_e = constant_time_eq_canonical(
            &(statement.point_e * self.response),
            &(self.commitment_e + statement.point_e1 * c),
        );
        let check_v = constant_time_eq_canonical(
            &(statement.point_v * self.response),
            &(self.commitment_v + statement.point_v1 * c),
        );

        check_g & check_e & check_v
    }
}
