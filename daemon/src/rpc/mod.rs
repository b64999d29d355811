pub mod rpc;

use std::collections::HashMap;

use log::{debug, trace};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::{
    blockchain::Blockchain,
    error::{BlockchainError, ErrorKind},
    storage::Storage,
};

pub const JSON_RPC_VERSION: &str = "2.0";

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Invalid JSON request")]
    InvalidJSONRequest,
    #[error("Invalid params: {}", _0)]
    InvalidJSONParams(#[from] serde_json::Error),
    #[error("Invalid params: {}", _0)]
    InvalidParams(String),
    #[error("Expected parameters for this method but was not present")]
    ExpectedParams,
    #[error("Method '{}' in request was not found", _0)]
    MethodNotFound(String),
    #[error("{}", _0.to_prefixed_string())]
    Blockchain(#[from] BlockchainError),
    #[error("Error while serializing the response: {}", _0)]
    SerializeResponse(serde_json::Error),
}

impl RpcError {
    pub fn get_code(&self) -> i16 {
        match self {
            Self::InvalidJSONRequest => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidJSONParams(_) | Self::InvalidParams(_) | Self::ExpectedParams => -32602,
            Self::SerializeResponse(_) => -32603,
            Self::Blockchain(e) => match e.kind() {
                ErrorKind::NotFound => -5,
                ErrorKind::Internal => -32603,
                // every other engine error is a rejected request
                _ => -32600,
            },
        }
    }
}

pub fn parse_params<P: DeserializeOwned>(value: Value) -> Result<P, RpcError> {
    if value.is_null() {
        return Err(RpcError::ExpectedParams);
    }
    serde_json::from_value(value).map_err(RpcError::InvalidJSONParams)
}

// Methods whose parameters are all optional accept a missing body
pub fn parse_optional_params<P: DeserializeOwned + Default>(value: Value) -> Result<P, RpcError> {
    if value.is_null() {
        return Ok(P::default());
    }
    serde_json::from_value(value).map_err(RpcError::InvalidJSONParams)
}

pub fn require_no_params(value: Value) -> Result<(), RpcError> {
    match value {
        Value::Null => Ok(()),
        Value::Array(ref values) if values.is_empty() => Ok(()),
        Value::Object(ref map) if map.is_empty() => Ok(()),
        _ => Err(RpcError::InvalidParams("Unexpected parameters for this method".to_owned())),
    }
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(RpcError::SerializeResponse)
}

/// Read only method, answered against the last committed block.
pub type Handler<S> = fn(&Blockchain<S>, Value) -> Result<Value, RpcError>;

/// Method registry of the query surface.
pub struct RpcHandler<S: Storage> {
    methods: HashMap<&'static str, Handler<S>>,
}

impl<S: Storage> Default for RpcHandler<S> {
    fn default() -> Self {
        let mut handler = Self {
            methods: HashMap::new(),
        };
        rpc::register_methods(&mut handler);
        handler
    }
}

impl<S: Storage> RpcHandler<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_method(&mut self, name: &'static str, handler: Handler<S>) {
        if self.methods.insert(name, handler).is_some() {
            debug!("method {} registered twice", name);
        }
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn call(&self, blockchain: &Blockchain<S>, method: &str, params: Value) -> Result<Value, RpcError> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| RpcError::MethodNotFound(method.to_owned()))?;
        trace!("calling {}", method);
        handler(blockchain, params)
    }

    /// Answers a JSON-RPC 2.0 request object.
    pub fn handle_request(&self, blockchain: &Blockchain<S>, request: Value) -> Value {
        let Value::Object(mut request) = request else {
            return error_response(Value::Null, &RpcError::InvalidJSONRequest);
        };
        let id = request.remove("id").unwrap_or(Value::Null);
        if request.get("jsonrpc").and_then(Value::as_str) != Some(JSON_RPC_VERSION) {
            return error_response(id, &RpcError::InvalidJSONRequest);
        }
        let Some(Value::String(method)) = request.remove("method") else {
            return error_response(id, &RpcError::InvalidJSONRequest);
        };
        let params = request.remove("params").unwrap_or(Value::Null);

        match self.call(blockchain, &method, params) {
            Ok(result) => {
                let mut response = Map::new();
                response.insert("jsonrpc".to_owned(), Value::String(JSON_RPC_VERSION.to_owned()));
                response.insert("id".to_owned(), id);
                response.insert("result".to_owned(), result);
                Value::Object(response)
            }
            Err(e) => {
                debug!("{} failed: {}", method, e);
                error_response(id, &e)
            }
        }
    }
}

fn error_response(id: Value, error: &RpcError) -> Value {
    let mut error_obj = Map::new();
    error_obj.insert("code".to_owned(), Value::Number(error.get_code().into()));
    error_obj.insert("message".to_owned(), Value::String(error.to_string()));

    let mut response = Map::new();
    response.insert("jsonrpc".to_owned(), Value::String(JSON_RPC_VERSION.to_owned()));
    response.insert("id".to_owned(), id);
    response.insert("error".to_owned(), Value::Object(error_obj));
    Value::Object(response)
}
