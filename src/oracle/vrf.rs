use schnorrkel::{
    context::SigningContext,
    vrf::{VRFPreOut, VRFProof},
    Keypair, PublicKey,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const VRF_SIGNING_CONTEXT: &[u8] = b"wagerpool-draw";
const VRF_OUTPUT_CONTEXT: &[u8] = b"wagerpool-draw-output";

/// VRF output with the proof needed to check it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VrfBundle {
    /// Hex-encoded VRF output (32 bytes) derived from the pre-output
    pub vrf_output: String,
    /// Hex-encoded VRF pre-output (32 bytes)
    pub vrf_preout: String,
    /// Hex-encoded DLEQ proof (64 bytes)
    pub vrf_proof: String,
    /// Hex-encoded public key (32 bytes)
    pub public_key: String,
    /// Input message the proof signs
    pub input_message: String,
}

impl VrfBundle {
    /// Draw value: first 16 output bytes, big-endian
    pub fn value(&self) -> Result<u128, String> {
        let output = hex::decode(&self.vrf_output)
            .map_err(|e| format!("Invalid VRF output hex: {}", e))?;
        Ok(VrfGenerator::value_from_output(&output))
    }
}

/// Verifiable random values for draws
#[derive(Clone)]
pub struct VrfGenerator {
    keypair: Arc<Keypair>,
}

impl VrfGenerator {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Fresh random keypair
    pub fn new_random() -> Self {
        use rand_core::OsRng;
        Self::new(Keypair::generate_with(OsRng))
    }

    /// Input message for one request
    pub fn input_for(source: &str, request_id: u64, seed: &str) -> String {
        format!("{}:{}:{}", source, request_id, seed)
    }

    /// Evaluates the VRF. One key and one input always give the same output.
    pub fn generate(&self, input_message: String) -> VrfBundle {
        let ctx = SigningContext::new(VRF_SIGNING_CONTEXT);
        let (inout, proof, _) = self.keypair.vrf_sign(ctx.bytes(input_message.as_bytes()));
        let output: [u8; 32] = inout.make_bytes(VRF_OUTPUT_CONTEXT);

        VrfBundle {
            vrf_output: hex::encode(output),
            vrf_preout: hex::encode(inout.to_preout().to_bytes()),
            vrf_proof: hex::encode(proof.to_bytes()),
            public_key: hex::encode(self.keypair.public.to_bytes()),
            input_message,
        }
    }

    pub fn value_from_output(output: &[u8]) -> u128 {
        let mut word = [0u8; 16];
        let n = output.len().min(16);
        word[..n].copy_from_slice(&output[..n]);
        u128::from_be_bytes(word)
    }

    /// Checks the proof, the input and that the output derives from the pre-output
    pub fn verify(bundle: &VrfBundle, expected_input: &str) -> Result<bool, String> {
        if bundle.input_message != expected_input {
            return Ok(false);
        }

        let vrf_output = hex::decode(&bundle.vrf_output)
            .map_err(|e| format!("Invalid VRF output hex: {}", e))?;
        let vrf_preout = hex::decode(&bundle.vrf_preout)
            .map_err(|e| format!("Invalid VRF pre-output hex: {}", e))?;
        let vrf_proof = hex::decode(&bundle.vrf_proof)
            .map_err(|e| format!("Invalid VRF proof hex: {}", e))?;
        let public_key_bytes = hex::decode(&bundle.public_key)
            .map_err(|e| format!("Invalid public key hex: {}", e))?;

        let public_key = PublicKey::from_bytes(&public_key_bytes)
            .map_err(|e| format!("Invalid public key: {:?}", e))?;
        let preout = VRFPreOut::from_bytes(&vrf_preout)
            .map_err(|e| format!("Invalid VRF pre-output: {:?}", e))?;
        let proof = VRFProof::from_bytes(&vrf_proof)
            .map_err(|e| format!("Invalid VRF proof: {:?}", e))?;

        let ctx = SigningContext::new(VRF_SIGNING_CONTEXT);
        let inout = match public_key.vrf_verify(ctx.bytes(expected_input.as_bytes()), &preout, &proof) {
            Ok((inout, _)) => inout,
            Err(_) => return Ok(false),
        };

        let expected: [u8; 32] = inout.make_bytes(VRF_OUTPUT_CONTEXT);
        Ok(expected.as_slice() == vrf_output.as_slice())
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }
}
