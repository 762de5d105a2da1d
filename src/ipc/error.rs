use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// HTTP-equivalent status for a front end that speaks REST.
pub fn http_status(code: &str) -> u16 {
    match code {
        "bad_params" | "invalid_status" => 400,
        "not_found" => 404,
        "conflict" => 409,
        "no_workspace" => 412,
        _ => 500,
    }
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
        "httpStatus": http_status(code),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }
}

impl From<crate::repo::RepoError> for HandlerErr {
    fn from(e: crate::repo::RepoError) -> Self {
        use crate::repo::RepoError;
        let code = match &e {
            RepoError::NotFound => "not_found",
            RepoError::Conflict => "conflict",
            RepoError::Corrupt(_) => "db_corrupt",
            RepoError::Db(_) => "db_query_failed",
        };
        HandlerErr::new(code, e.to_string())
    }
}
