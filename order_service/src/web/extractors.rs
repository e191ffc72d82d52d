// medflow-orders/src/web/extractors.rs

//! Caller identity. Authentication happens upstream; the gateway forwards
//! the verified user id and role as headers.

use crate::errors::AppError;
use actix_web::dev::Payload;
use actix_web::http::header::HeaderMap;
use actix_web::{FromRequest, HttpRequest};
use std::future::{ready, Ready};
use std::str::FromStr;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Buyer,
  Pharmacist,
}

impl FromStr for Role {
  type Err = AppError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "buyer" | "user" => Ok(Role::Buyer),
      "pharmacist" => Ok(Role::Pharmacist),
      other => Err(AppError::Unauthorized(format!("unknown role '{}'", other))),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
  pub user_id: i64,
  pub role: Role,
}

impl AuthenticatedUser {
  pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
    let header = |name: &str| {
      headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(format!("missing {} header", name)))
    };
    let user_id = header(USER_ID_HEADER)?
      .trim()
      .parse::<i64>()
      .map_err(|_| AppError::Unauthorized(format!("malformed {} header", USER_ID_HEADER)))?;
    // Missing role means an ordinary buyer.
    let role = match headers.get(USER_ROLE_HEADER) {
      None => Role::Buyer,
      Some(_) => header(USER_ROLE_HEADER)?.parse()?,
    };
    Ok(Self { user_id, role })
  }

  pub fn require_pharmacist(&self) -> Result<i64, AppError> {
    match self.role {
      Role::Pharmacist => Ok(self.user_id),
      Role::Buyer => Err(AppError::Forbidden("pharmacist role required".to_string())),
    }
  }
}

impl FromRequest for AuthenticatedUser {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
    ready(AuthenticatedUser::from_headers(req.headers()))
  }
}
