//! Structural and claims validation
//!
//! All checks take `now` explicitly. Time comparisons are inclusive at the
//! leeway boundaries: a token with `exp = T` is accepted up to and including
//! `T + leeway`.

use serde_json::Value;

use super::{Claims, DecodedJwt, JwtError, parse_jwt};
use crate::config::ClientConfig;
use crate::crypto;
use crate::pkce::nonce_hash;

/// Accepted signing algorithms; HMAC and `none` are never accepted
pub const ALLOWED_ALGORITHMS: [&str; 9] = [
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "ES512",
];

fn non_empty_str<'a>(map: &'a Claims, name: &str) -> Option<&'a str> {
    map.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Read a time claim, accepting JSON numbers and numeric strings
fn numeric_claim(claims: &Claims, name: &'static str) -> Result<Option<i64>, JwtError> {
    let Some(value) = claims.get(name) else {
        return Ok(None);
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        Value::Null => return Ok(None),
        _ => None,
    };
    parsed.map(Some).ok_or(JwtError::InvalidNumericClaim(name))
}

/// Check `alg` and `typ`
///
/// # Errors
///
/// [`JwtError::MissingHeader`] or [`JwtError::UnsupportedAlgorithm`].
pub fn validate_jwt_header(header: &Claims) -> Result<(), JwtError> {
    let alg = non_empty_str(header, "alg").ok_or(JwtError::MissingHeader("alg"))?;
    non_empty_str(header, "typ").ok_or(JwtError::MissingHeader("typ"))?;
    if !ALLOWED_ALGORITHMS.contains(&alg) {
        return Err(JwtError::UnsupportedAlgorithm(alg.to_string()));
    }
    Ok(())
}

/// Check issuer and the time-based claims that are present
///
/// # Errors
///
/// Returns the first failing rule.
pub fn validate_jwt_claims(claims: &Claims, config: &ClientConfig, now: i64) -> Result<(), JwtError> {
    let leeway = config.token_leeway_seconds as i64;

    if let Some(iss) = claims.get("iss") {
        let actual = iss.as_str().unwrap_or_default();
        if actual != config.issuer {
            return Err(JwtError::IssuerMismatch {
                expected: config.issuer.clone(),
                actual: actual.to_string(),
            });
        }
    }

    if let Some(exp) = numeric_claim(claims, "exp")?
        && now > exp + leeway
    {
        return Err(JwtError::Expired { exp });
    }

    if let Some(nbf) = numeric_claim(claims, "nbf")?
        && now < nbf - leeway
    {
        return Err(JwtError::NotYetValid { nbf });
    }

    if let Some(max_age) = config.authentication_max_age_seconds
        && let Some(auth_time) = numeric_claim(claims, "auth_time")?
        && now > auth_time + max_age as i64 + leeway
    {
        return Err(JwtError::AuthenticationTooOld { auth_time });
    }

    Ok(())
}

/// Presence-only signature check
///
/// # Errors
///
/// [`JwtError::MissingSignature`] when the third segment is empty.
pub fn validate_jwt_signature(signature: &str) -> Result<(), JwtError> {
    if signature.is_empty() {
        return Err(JwtError::MissingSignature);
    }
    Ok(())
}

/// ID-token specific rules (OpenID Connect Core §3.1.3.7)
///
/// # Errors
///
/// Returns the first failing rule.
pub fn validate_id_token_claims(claims: &Claims, config: &ClientConfig) -> Result<(), JwtError> {
    non_empty_str(claims, "iss").ok_or(JwtError::MissingClaim("iss"))?;
    non_empty_str(claims, "sub").ok_or(JwtError::MissingClaim("sub"))?;
    for name in ["exp", "iat"] {
        if claims.get(name).is_none_or(Value::is_null) {
            return Err(JwtError::MissingClaim(name));
        }
    }

    let audiences: Vec<&str> = match claims.get("aud") {
        Some(Value::String(s)) if !s.is_empty() => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    if audiences.is_empty() {
        return Err(JwtError::MissingClaim("aud"));
    }

    if config.use_nonce && non_empty_str(claims, "nonce").is_none() {
        return Err(JwtError::MissingClaim("nonce"));
    }
    if config.authentication_max_age_seconds.is_some() && claims.get("auth_time").is_none() {
        return Err(JwtError::MissingClaim("auth_time"));
    }

    let client_id = config.client_id.as_str();
    let azp = non_empty_str(claims, "azp");

    if audiences.len() == 1 && audiences[0] != client_id && azp.is_none() {
        return Err(JwtError::MissingAuthorizedParty);
    }
    if !audiences.contains(&client_id) && azp != Some(client_id) {
        return Err(JwtError::AudienceMismatch);
    }
    if let Some(azp) = azp
        && azp != client_id
    {
        return Err(JwtError::AuthorizedPartyMismatch(azp.to_string()));
    }

    Ok(())
}

/// Compare the token's `nonce` with the hash of the stored nonce
///
/// Tokens without a `nonce` claim pass unchanged.
///
/// # Errors
///
/// [`JwtError::NonceMismatch`] when the claim is present but does not match,
/// including when no nonce is stored.
pub fn validate_jwt_nonce(claims: &Claims, stored_nonce: Option<&str>) -> Result<(), JwtError> {
    let Some(claim) = claims.get("nonce") else {
        return Ok(());
    };
    let claim = claim.as_str().unwrap_or_default();
    match stored_nonce {
        Some(nonce) if crypto::constant_time_eq(&nonce_hash(nonce), claim) => Ok(()),
        _ => Err(JwtError::NonceMismatch),
    }
}

/// Parse and run header, claims and signature checks
///
/// # Errors
///
/// Returns the first failing rule.
pub fn validate_jwt(token: &str, config: &ClientConfig, now: i64) -> Result<DecodedJwt, JwtError> {
    let decoded = parse_jwt(token);
    validate_jwt_header(&decoded.header)?;
    validate_jwt_claims(&decoded.claims, config, now)?;
    validate_jwt_signature(&decoded.signature)?;
    Ok(decoded)
}

/// Structural, claims and ID-token rules
///
/// The nonce is only checked while its flow is pending, see
/// [`validate_jwt_nonce`].
///
/// # Errors
///
/// Returns the first failing rule.
pub fn validate_id_token(token: &str, config: &ClientConfig, now: i64) -> Result<DecodedJwt, JwtError> {
    let decoded = validate_jwt(token, config, now)?;
    validate_id_token_claims(&decoded.claims, config)?;
    Ok(decoded)
}

/// Access token validation
///
/// Opaque tokens are only checked against `expires_at`. JWT access tokens
/// additionally go through header, claims and signature checks.
/// Returns the decoded token for JWTs.
///
/// # Errors
///
/// [`JwtError::Expired`] once `now > expires_at`, or the first failing JWT rule.
pub fn validate_access_token(
    token: &str,
    expires_at: Option<i64>,
    config: &ClientConfig,
    now: i64,
) -> Result<Option<DecodedJwt>, JwtError> {
    if let Some(exp) = expires_at
        && now > exp
    {
        return Err(JwtError::Expired { exp });
    }
    if !super::looks_like_jwt(token) {
        return Ok(None);
    }
    validate_jwt(token, config, now).map(Some)
}
