//! Minimal curve algebra for confidential transactions: zero-capable
//! scalars and identity-capable points over secp256k1, Pedersen
//! commitments, and the two-party Schnorr multisignature used by
//! transaction kernels.

use std::ops::{Add, Mul, Neg, Sub};
use std::sync::OnceLock;

use secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::WalletError;
use crate::types::{Amount, CoinId};

fn secp() -> &'static Secp256k1<All> {
    static CTX: OnceLock<Secp256k1<All>> = OnceLock::new();
    CTX.get_or_init(Secp256k1::new)
}

/// Second Pedersen generator, derived by hashing to a curve point so its
/// discrete log relative to G stays unknown.
fn generator_h() -> &'static PublicKey {
    static H: OnceLock<PublicKey> = OnceLock::new();
    H.get_or_init(|| {
        let mut counter = 0u32;
        loop {
            let mut hasher = Sha256::new();
            hasher.update(b"umbra.generator.h");
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            let mut candidate = [0u8; 33];
            candidate[0] = 0x02;
            candidate[1..].copy_from_slice(&digest);
            if let Ok(point) = PublicKey::from_slice(&candidate) {
                return point;
            }
            counter += 1;
        }
    })
}

/// Curve-order scalar. Unlike [`secp256k1::SecretKey`] it represents
/// zero, which arithmetic on blinding factors and offsets runs into
/// routinely.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Scalar(Option<SecretKey>);

impl Scalar {
    pub fn zero() -> Scalar {
        Scalar(None)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_none()
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Result<Scalar, WalletError> {
        if bytes == [0u8; 32] {
            return Ok(Scalar(None));
        }
        SecretKey::from_slice(&bytes)
            .map(|sk| Scalar(Some(sk)))
            .map_err(|_| WalletError::InvalidScalar)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        match self.0 {
            None => [0u8; 32],
            Some(sk) => sk.secret_bytes(),
        }
    }

    pub fn from_u64(value: u64) -> Scalar {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        // a u64 can never reach the curve order
        Scalar::from_bytes(bytes).unwrap()
    }

    pub fn random() -> Scalar {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill_bytes(&mut bytes);
            if let Ok(scalar) = Scalar::from_bytes(bytes) {
                if !scalar.is_zero() {
                    return scalar;
                }
            }
        }
    }

    pub fn to_point(&self) -> Point {
        match self.0 {
            None => Point::identity(),
            Some(sk) => Point(Some(PublicKey::from_secret_key(secp(), &sk))),
        }
    }
}

impl Add for Scalar {
    type Output = Scalar;
    fn add(self, rhs: Scalar) -> Scalar {
        match (self.0, rhs.0) {
            (None, _) => rhs,
            (_, None) => self,
            (Some(a), Some(b)) => {
                // the only tweak failure mode is a zero result
                match a.add_tweak(&secp256k1::Scalar::from(b)) {
                    Ok(sum) => Scalar(Some(sum)),
                    Err(_) => Scalar(None),
                }
            }
        }
    }
}

impl Sub for Scalar {
    type Output = Scalar;
    fn sub(self, rhs: Scalar) -> Scalar {
        self + (-rhs)
    }
}

impl Neg for Scalar {
    type Output = Scalar;
    fn neg(self) -> Scalar {
        Scalar(self.0.map(|sk| sk.negate()))
    }
}

impl Mul for Scalar {
    type Output = Scalar;
    fn mul(self, rhs: Scalar) -> Scalar {
        match (self.0, rhs.0) {
            (Some(a), Some(b)) => match a.mul_tweak(&secp256k1::Scalar::from(b)) {
                Ok(product) => Scalar(Some(product)),
                Err(_) => Scalar(None),
            },
            _ => Scalar(None),
        }
    }
}

impl std::fmt::Debug for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Scalar({})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Scalar, D::Error> {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        Scalar::from_bytes(bytes).map_err(serde::de::Error::custom)
    }
}

/// Curve point, including the identity element.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point(Option<PublicKey>);

impl Point {
    pub fn identity() -> Point {
        Point(None)
    }

    pub fn is_identity(&self) -> bool {
        self.0.is_none()
    }

    pub fn to_bytes(&self) -> [u8; 33] {
        match self.0 {
            None => [0u8; 33],
            Some(pk) => pk.serialize(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Point, WalletError> {
        if bytes.len() != 33 {
            return Err(WalletError::InvalidPoint);
        }
        if bytes == [0u8; 33] {
            return Ok(Point(None));
        }
        PublicKey::from_slice(bytes)
            .map(|pk| Point(Some(pk)))
            .map_err(|_| WalletError::InvalidPoint)
    }

    pub fn generator() -> Point {
        Scalar::from_u64(1).to_point()
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        match (self.0, rhs.0) {
            (None, _) => rhs,
            (_, None) => self,
            (Some(a), Some(b)) => match a.combine(&b) {
                Ok(sum) => Point(Some(sum)),
                // combining opposite points yields the identity
                Err(_) => Point(None),
            },
        }
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        self + (-rhs)
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point(self.0.map(|pk| pk.negate(secp())))
    }
}

impl Mul<Scalar> for Point {
    type Output = Point;
    fn mul(self, rhs: Scalar) -> Point {
        match (self.0, rhs.0) {
            (Some(pk), Some(sk)) => match pk.mul_tweak(secp(), &secp256k1::Scalar::from(sk)) {
                Ok(product) => Point(Some(product)),
                Err(_) => Point(None),
            },
            _ => Point(None),
        }
    }
}

impl std::fmt::Debug for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Point({})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().to_vec().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Point {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Point, D::Error> {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        Point::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Pedersen commitment `blind * G + value * H`.
pub fn commit(value: Amount, blind: &Scalar) -> Point {
    blind.to_point() + Point(Some(*generator_h())) * Scalar::from_u64(value)
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Map a digest preimage onto a non-zero scalar. The retry tag only
/// matters in the astronomically unlikely overflow case.
pub fn scalar_from_hash(data: &[u8]) -> Scalar {
    let mut tag = 0u8;
    loop {
        let mut hasher = Sha256::new();
        hasher.update(data);
        if tag > 0 {
            hasher.update([tag]);
        }
        let digest: [u8; 32] = hasher.finalize().into();
        if let Ok(scalar) = Scalar::from_bytes(digest) {
            if !scalar.is_zero() {
                return scalar;
            }
        }
        tag += 1;
    }
}

/// Schnorr challenge over the aggregated public nonce and the kernel
/// message.
pub fn challenge(nonce_pub: &Point, message: &[u8; 32]) -> Scalar {
    let mut data = Vec::with_capacity(65);
    data.extend_from_slice(&nonce_pub.to_bytes());
    data.extend_from_slice(message);
    scalar_from_hash(&data)
}

/// One party's Schnorr share: `k = nonce - e * excess`, with the
/// challenge taken over the aggregated nonce of both parties.
pub fn sign_partial(
    excess: &Scalar,
    nonce: &Scalar,
    total_nonce_pub: &Point,
    message: &[u8; 32],
) -> Scalar {
    let e = challenge(total_nonce_pub, message);
    *nonce - e * *excess
}

/// Verify a peer's share against its public nonce and excess. The
/// challenge still uses the aggregated nonce.
pub fn verify_partial(
    k: &Scalar,
    total_nonce_pub: &Point,
    message: &[u8; 32],
    peer_nonce_pub: &Point,
    peer_excess_pub: &Point,
) -> bool {
    let e = challenge(total_nonce_pub, message);
    k.to_point() + *peer_excess_pub * e == *peer_nonce_pub
}

/// Completed Schnorr signature: the aggregated public nonce and the sum
/// of the partial shares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub nonce_pub: Point,
    pub k: Scalar,
}

impl Signature {
    pub fn zero() -> Signature {
        Signature {
            nonce_pub: Point::identity(),
            k: Scalar::zero(),
        }
    }

    pub fn sign(message: &[u8; 32], key: &Scalar) -> Signature {
        let nonce = Scalar::random();
        let nonce_pub = nonce.to_point();
        let k = sign_partial(key, &nonce, &nonce_pub, message);
        Signature { nonce_pub, k }
    }

    pub fn is_valid(&self, message: &[u8; 32], public_key: &Point) -> bool {
        let e = challenge(&self.nonce_pub, message);
        self.k.to_point() + *public_key * e == self.nonce_pub
    }
}

/// Receiver's signed acknowledgement of a payment, binding the kernel
/// id, the amount and the sender identity to the receiver's address key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaymentConfirmation {
    pub kernel_id: [u8; 32],
    pub value: Amount,
    pub sender: Point,
}

impl PaymentConfirmation {
    fn message(&self) -> [u8; 32] {
        let mut data = Vec::with_capacity(32 + 8 + 33 + 24);
        data.extend_from_slice(b"umbra.payment.confirmation");
        data.extend_from_slice(&self.kernel_id);
        data.extend_from_slice(&self.value.to_le_bytes());
        data.extend_from_slice(&self.sender.to_bytes());
        sha256(&data)
    }

    pub fn sign(&self, key: &Scalar) -> Signature {
        Signature::sign(&self.message(), key)
    }

    pub fn is_valid(&self, signer: &Point, signature: &Signature) -> bool {
        signature.is_valid(&self.message(), signer)
    }
}

/// Deterministic key derivation tree. The wallet holds a master instance
/// seeded at creation; per-output keys come from child instances keyed
/// by the coin's sub index.
#[derive(Clone)]
pub struct Kdf {
    seed: [u8; 32],
}

impl Kdf {
    pub fn from_seed(seed: [u8; 32]) -> Kdf {
        Kdf { seed }
    }

    pub fn child(&self, sub_idx: u32) -> Kdf {
        let mut data = Vec::with_capacity(32 + 4 + 16);
        data.extend_from_slice(b"umbra.kdf.child");
        data.extend_from_slice(&self.seed);
        data.extend_from_slice(&sub_idx.to_le_bytes());
        Kdf {
            seed: sha256(&data),
        }
    }

    fn derive(&self, domain: &[u8], data: &[u8]) -> Scalar {
        let mut buf = Vec::with_capacity(32 + domain.len() + data.len());
        buf.extend_from_slice(&self.seed);
        buf.extend_from_slice(domain);
        buf.extend_from_slice(data);
        scalar_from_hash(&buf)
    }

    /// Blinding factor of an owned output.
    pub fn derive_coin_key(&self, id: &CoinId) -> Scalar {
        let mut data = Vec::with_capacity(8 + 4 + 8 + 4);
        data.extend_from_slice(&id.idx.to_le_bytes());
        data.extend_from_slice(&id.sub_idx.to_le_bytes());
        data.extend_from_slice(&id.value.to_le_bytes());
        data.push(id.key_type as u8);
        self.derive(b"coin", &data)
    }

    /// Kernel blinding excess for an allocated key index.
    pub fn derive_kernel_key(&self, idx: u64) -> Scalar {
        self.derive(b"kernel", &idx.to_le_bytes())
    }

    /// Multisig nonce, re-derivable from the persisted random seed so a
    /// replayed negotiation produces the same nonce.
    pub fn derive_from_seed(&self, seed: &[u8; 32]) -> Scalar {
        self.derive(b"nonce", seed)
    }

    /// Address key backing payment confirmations.
    pub fn derive_address_key(&self, own_id: u64) -> Scalar {
        self.derive(b"address", &own_id.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_algebra() {
        let a = Scalar::from_u64(5);
        let b = Scalar::from_u64(7);
        assert_eq!(a + b, Scalar::from_u64(12));
        assert_eq!(b - a, Scalar::from_u64(2));
        assert_eq!(a * b, Scalar::from_u64(35));
        assert_eq!(a + (-a), Scalar::zero());
        assert_eq!(a + Scalar::zero(), a);
        assert_eq!(a * Scalar::zero(), Scalar::zero());
        assert!((-Scalar::zero()).is_zero());
    }

    #[test]
    fn scalar_roundtrips_through_bytes() {
        let s = Scalar::random();
        assert_eq!(Scalar::from_bytes(s.to_bytes()).unwrap(), s);
        assert_eq!(Scalar::from_bytes([0u8; 32]).unwrap(), Scalar::zero());
    }

    #[test]
    fn point_algebra_matches_scalar_algebra() {
        let a = Scalar::random();
        let b = Scalar::random();
        assert_eq!(a.to_point() + b.to_point(), (a + b).to_point());
        assert_eq!(a.to_point() - a.to_point(), Point::identity());
        assert_eq!(Point::generator() * a, a.to_point());
        assert_eq!(
            Point::from_bytes(&a.to_point().to_bytes()).unwrap(),
            a.to_point()
        );
    }

    #[test]
    fn commitments_are_homomorphic() {
        let x = Scalar::random();
        let y = Scalar::random();
        assert_eq!(commit(3, &x) + commit(4, &y), commit(7, &(x + y)));
    }

    #[test]
    fn commitment_hides_behind_independent_generator() {
        // value * H alone must not equal value * G
        assert_ne!(
            commit(9, &Scalar::zero()),
            Point::generator() * Scalar::from_u64(9)
        );
    }

    #[test]
    fn single_signer_schnorr() {
        let key = Scalar::random();
        let message = sha256(b"kernel");
        let sig = Signature::sign(&message, &key);
        assert!(sig.is_valid(&message, &key.to_point()));
        assert!(!sig.is_valid(&message, &Scalar::random().to_point()));
        assert!(!sig.is_valid(&sha256(b"other"), &key.to_point()));
    }

    #[test]
    fn two_party_multisig_combines() {
        let (xa, xb) = (Scalar::random(), Scalar::random());
        let (na, nb) = (Scalar::random(), Scalar::random());
        let message = sha256(b"shared kernel");

        let total_nonce = na.to_point() + nb.to_point();
        let ka = sign_partial(&xa, &na, &total_nonce, &message);
        let kb = sign_partial(&xb, &nb, &total_nonce, &message);

        // each share verifies in isolation
        assert!(verify_partial(
            &ka,
            &total_nonce,
            &message,
            &na.to_point(),
            &xa.to_point()
        ));
        assert!(verify_partial(
            &kb,
            &total_nonce,
            &message,
            &nb.to_point(),
            &xb.to_point()
        ));
        // a tampered share does not
        assert!(!verify_partial(
            &Scalar::random(),
            &total_nonce,
            &message,
            &nb.to_point(),
            &xb.to_point()
        ));

        // the sum is a valid signature for the aggregated key
        let full = Signature {
            nonce_pub: total_nonce,
            k: ka + kb,
        };
        assert!(full.is_valid(&message, &(xa.to_point() + xb.to_point())));
    }

    #[test]
    fn payment_confirmation_roundtrip() {
        let key = Scalar::random();
        let pc = PaymentConfirmation {
            kernel_id: sha256(b"kernel-id"),
            value: 42,
            sender: Scalar::random().to_point(),
        };
        let sig = pc.sign(&key);
        assert!(pc.is_valid(&key.to_point(), &sig));

        let tampered = PaymentConfirmation { value: 43, ..pc };
        assert!(!tampered.is_valid(&key.to_point(), &sig));
    }

    #[test]
    fn kdf_is_deterministic_and_separated() {
        let kdf = Kdf::from_seed(sha256(b"seed"));
        let id = CoinId {
            idx: 1,
            sub_idx: 0,
            value: 10,
            key_type: crate::types::KeyType::Regular,
        };
        assert_eq!(kdf.derive_coin_key(&id), kdf.derive_coin_key(&id));
        assert_ne!(kdf.derive_coin_key(&id), kdf.child(1).derive_coin_key(&id));
        assert_ne!(kdf.derive_kernel_key(1), kdf.derive_address_key(1));

        let seed = sha256(b"nonce-seed");
        assert_eq!(kdf.derive_from_seed(&seed), kdf.derive_from_seed(&seed));
    }
}
