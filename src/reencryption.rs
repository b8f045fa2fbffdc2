use ark_ec::CurveGroup;
use ark_serialize::*;

use crate::capsule::Capsule;
use crate::error::PreError;
use crate::kfrag::ReKeyFragment;
use crate::policy::{CapsuleId, FragmentId, PolicyId};
use crate::proof::{CorrectnessProof, Statement};
use crate::utils::to_bytes;

/// A proxy's partial result: one fragment applied to one capsule.
#[derive(CanonicalSerialize, CanonicalDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct ReEncryptedFragment<C: CurveGroup> {
    /// Identifier of the fragment that produced this partial
    pub fragment_id: FragmentId,
    pub policy: PolicyId,
    pub threshold: u32,
    pub capsule_id: CapsuleId,
    pub precursor: C,
    /// `E·rk`
    pub point_e1: C,
    /// `V·rk`
    pub point_v1: C,
    /// Serialized [`CorrectnessProof`]; opaque to the combiner
    pub proof: Vec<u8>,
}

/// Everything a partial asserts besides its points: which fragment produced
/// it, for which policy parameters, over which capsule.
fn proof_context<C: CurveGroup>(
    fragment_id: &FragmentId,
    policy: &PolicyId,
    threshold: u32,
    precursor: &C,
    capsule_id: &CapsuleId,
) -> Result<Vec<u8>, PreError> {
    let mut context = Vec::with_capacity(160);
    context.extend_from_slice(fragment_id.as_bytes());
    context.extend_from_slice(policy.as_bytes());
    context.extend_from_slice(&threshold.to_le_bytes());
    context.extend_from_slice(&to_bytes(precursor)?);
    context.extend_from_slice(capsule_id.as_bytes());
    Ok(context)
}

/// Applies one fragment to one capsule.
///
/// Runs at a proxy. Needs nothing but the fragment, performs no I/O and is
/// deterministic, so it is safe to call concurrently for any inputs.
///
/// # Errors
/// Returns `InvalidCapsule` if the capsule fails its integrity check
pub fn reencrypt<C: CurveGroup>(
    fragment: &ReKeyFragment<C>,
    capsule: &Capsule<C>,
) -> Result<ReEncryptedFragment<C>, PreError> {
    if !capsule.verify() {
        return Err(PreError::InvalidCapsule);
    }

    let rekey = fragment.rekey();
    let point_e1 = capsule.point_e * rekey;
    let point_v1 = capsule.point_v * rekey;
    let capsule_id = capsule.id()?;

    let statement = Statement {
        verification_key: fragment.verification_key,
        point_e: capsule.point_e,
        point_e1,
        point_v: capsule.point_v,
        point_v1,
    };
    let context = proof_context(
        &fragment.id,
        &fragment.policy,
        fragment.threshold,
        &fragment.precursor,
        &capsule_id,
    )?;
    let proof = CorrectnessProof::prove(rekey, &statement, &context)?;

    Ok(ReEncryptedFragment {
        fragment_id: fragment.id,
        policy: fragment.policy,
        threshold: fragment.threshold,
        capsule_id,
        precursor: fragment.precursor,
        point_e1,
        point_v1,
        proof: to_bytes(&proof)?,
    })
}

/// Checks that `partial` was computed from the fragment whose verification
/// key is `verification_key`, applied to `capsule`.
///
/// The proof also covers the partial's policy, threshold and precursor, so a
/// proxy cannot alter them without failing the check. Malformed proof bytes
/// count as a failed check.
pub fn verify_correctness<C: CurveGroup>(
    partial: &ReEncryptedFragment<C>,
    capsule: &Capsule<C>,
    verification_key: &C,
) -> bool {
    let Ok(capsule_id) = capsule.id() else {
        return false;
    };
    if capsule_id != partial.capsule_id {
        return false;
    }
    let Ok(proof) = CorrectnessProof::<C>::deserialize_compressed(&partial.proof[..]) else {
        return false;
    };

    let statement = Statement {
        verification_key: *verification_key,
        point_e: capsule.point_e,
        point_e1: partial.point_e1,
        point_v: capsule.point_v,
        point_v1: partial.point_v1,
    };
    let Ok(context) = proof_context(
        &partial.fragment_id,
        &partial.policy,
        partial.threshold,
        &partial.precursor,
        &capsule_id,
    ) else {
        return false;
    };
    proof.verify(&statement, &context)
}

impl<C: CurveGroup> ReEncryptedFragment<C> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PreError> {
        to_bytes(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PreError> {
        Ok(Self::deserialize_compressed(bytes)?)
    }
}
