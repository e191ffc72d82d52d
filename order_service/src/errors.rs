// medflow-orders/src/errors.rs

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

use crate::models::order::TransitionError;
use medflow::FlowError;

/// Broad classes every error collapses into at the HTTP and task boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  NotFound,
  Conflict,
  Forbidden,
  Unauthorized,
  Server,
}

impl ErrorKind {
  pub fn status_code(&self) -> StatusCode {
    match self {
      ErrorKind::Validation => StatusCode::BAD_REQUEST,
      ErrorKind::NotFound => StatusCode::NOT_FOUND,
      ErrorKind::Conflict => StatusCode::CONFLICT,
      ErrorKind::Forbidden => StatusCode::FORBIDDEN,
      ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
      ErrorKind::Server => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
  pub field: String,
  pub message: String,
}

/// Distinct reasons a checkout is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckoutError {
  #[error("pharmacy {pharmacy_id} is not accepting orders")]
  InactivePharmacy { pharmacy_id: i64 },

  #[error("address {address_id} not found")]
  AddressNotFound { address_id: i64 },

  #[error("offer {offer_id} is not in the cart")]
  CartItemMissing { offer_id: i64 },

  #[error("cart holds {in_cart} of offer {offer_id}, {requested} requested")]
  InsufficientCartQuantity { offer_id: i64, in_cart: i32, requested: i32 },

  #[error("offer {offer_id} not found")]
  OfferNotFound { offer_id: i64 },

  #[error("offer {offer_id} does not belong to pharmacy {pharmacy_id}")]
  OfferNotInPharmacy { offer_id: i64, pharmacy_id: i64 },

  #[error("offer {offer_id} is no longer active")]
  InactiveProduct { offer_id: i64 },

  #[error("insufficient stock for offer {offer_id}: {requested} requested")]
  InsufficientStock { offer_id: i64, requested: i32 },

  #[error("price of offer {offer_id} changed: submitted {submitted}, current {current}")]
  PriceMismatch { offer_id: i64, submitted: i64, current: i64 },
}

impl CheckoutError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      CheckoutError::AddressNotFound { .. } | CheckoutError::CartItemMissing { .. } | CheckoutError::OfferNotFound { .. } => {
        ErrorKind::NotFound
      }
      CheckoutError::OfferNotInPharmacy { .. } => ErrorKind::Validation,
      CheckoutError::InactivePharmacy { .. }
      | CheckoutError::InsufficientCartQuantity { .. }
      | CheckoutError::InactiveProduct { .. }
      | CheckoutError::InsufficientStock { .. }
      | CheckoutError::PriceMismatch { .. } => ErrorKind::Conflict,
    }
  }
}

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {message}")]
  Validation { message: String, fields: Vec<FieldError> },

  #[error("Authentication Required: {0}")]
  Unauthorized(String),

  #[error("Forbidden: {0}")]
  Forbidden(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  #[error("Conflict: {0}")]
  Conflict(String),

  #[error("Checkout Refused: {0}")]
  Checkout(#[from] CheckoutError),

  #[error("Order {order_id}: {source}")]
  InvalidTransition {
    order_id: i64,
    #[source]
    source: TransitionError,
  },

  #[error("Stale transition: expected {expected} orders to change, {affected} did")]
  StaleTransition { expected: u64, affected: u64 },

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Migration Error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  #[error("Storage Error: {0}")]
  Storage(String),

  #[error("Queue Error: {0}")]
  Queue(String),

  #[error("Workflow Error: {source}")]
  Workflow {
    #[from]
    source: FlowError,
  },

  #[error("Internal Server Error: {0}")]
  Internal(String),

  #[error("Pipeline execution was halted by a handler.")]
  PipelineHaltedByHandler,
}

impl AppError {
  pub fn validation(message: impl Into<String>) -> Self {
    AppError::Validation {
      message: message.into(),
      fields: Vec::new(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      AppError::Validation { .. } => ErrorKind::Validation,
      AppError::Unauthorized(_) => ErrorKind::Unauthorized,
      AppError::Forbidden(_) => ErrorKind::Forbidden,
      AppError::NotFound(_) => ErrorKind::NotFound,
      AppError::Conflict(_) | AppError::InvalidTransition { .. } | AppError::StaleTransition { .. } => ErrorKind::Conflict,
      AppError::Checkout(err) => err.kind(),
      AppError::Config(_)
      | AppError::Sqlx(_)
      | AppError::Migrate(_)
      | AppError::Storage(_)
      | AppError::Queue(_)
      | AppError::Workflow { .. }
      | AppError::Internal(_)
      | AppError::PipelineHaltedByHandler => ErrorKind::Server,
    }
  }

  fn fields(&self) -> Option<&[FieldError]> {
    match self {
      AppError::Validation { fields, .. } if !fields.is_empty() => Some(fields),
      _ => None,
    }
  }

  /// Message safe to show a client. Server-side details stay in the logs.
  fn public_message(&self) -> String {
    match self.kind() {
      ErrorKind::Server => "An internal error occurred".to_string(),
      _ => match self {
        AppError::Validation { message, .. } => message.clone(),
        AppError::Unauthorized(m) | AppError::Forbidden(m) | AppError::NotFound(m) | AppError::Conflict(m) => m.clone(),
        AppError::Checkout(err) => err.to_string(),
        other => other.to_string(),
      },
    }
  }
}

impl From<ValidationErrors> for AppError {
  fn from(errors: ValidationErrors) -> Self {
    let mut fields = Vec::new();
    flatten_validation_errors("", &errors, &mut fields);
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    AppError::Validation {
      message: "Request validation failed".to_string(),
      fields,
    }
  }
}

fn flatten_validation_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
  for (field, kind) in errors.errors() {
    let path = if prefix.is_empty() {
      field.to_string()
    } else {
      format!("{}.{}", prefix, field)
    };
    match kind {
      ValidationErrorsKind::Field(list) => {
        for err in list {
          let message = err
            .message
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| err.code.to_string());
          out.push(FieldError {
            field: path.clone(),
            message,
          });
        }
      }
      ValidationErrorsKind::Struct(nested) => flatten_validation_errors(&path, nested, out),
      ValidationErrorsKind::List(items) => {
        for (idx, nested) in items {
          flatten_validation_errors(&format!("{}[{}]", path, idx), nested, out);
        }
      }
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<AppError>() {
      Ok(app_err) => app_err,
      Err(err) => match err.downcast::<sqlx::Error>() {
        Ok(sqlx_err) => AppError::Sqlx(sqlx_err),
        Err(err) => AppError::Internal(err.to_string()),
      },
    }
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    self.kind().status_code()
  }

  fn error_response(&self) -> HttpResponse {
    let kind = self.kind();
    if kind == ErrorKind::Server {
      tracing::error!(application_error = %self, "Responding with server error");
    } else {
      tracing::info!(application_error = %self, ?kind, "Responding with client error");
    }

    let mut body = json!({
      "kind": kind,
      "message": self.public_message(),
    });
    if let Some(fields) = self.fields() {
      body["fields"] = json!(fields);
    }
    HttpResponse::build(kind.status_code()).json(json!({ "error": body }))
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
