//! Purpose: Describe a service type and render its requests to bytes.
//! Exports: `ServiceTypeSupport`.
//! Role: Bound to a client at init; every request is serialized through it.
//! Invariants: Requests are JSON; declared request fields must match exactly.
//! Notes: Clones share one descriptor, so binding it to a client allocates nothing.

use crate::core::error::{Error, ErrorKind};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Eq, PartialEq)]
struct Descriptor {
    package: String,
    service: String,
    request_fields: Option<Vec<String>>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceTypeSupport {
    descriptor: Arc<Descriptor>,
}

impl ServiceTypeSupport {
    pub fn new(package: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            descriptor: Arc::new(Descriptor {
                package: package.into(),
                service: service.into(),
                request_fields: None,
            }),
        }
    }

    /// Accepts `pkg/Service` or `pkg/srv/Service`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let parts: Vec<&str> = input.split('/').collect();
        let (package, service) = match parts.as_slice() {
            [package, service] => (*package, *service),
            [package, "srv", service] => (*package, *service),
            _ => {
                return Err(Error::new(ErrorKind::InvalidArgument)
                    .with_message(format!("service type must be pkg/Service, got {input:?}")));
            }
        };
        if package.is_empty() || service.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("service type has an empty part: {input:?}")));
        }
        Ok(Self::new(package, service))
    }

    pub fn with_request_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request_fields = Some(fields.into_iter().map(Into::into).collect());
        self.descriptor = Arc::new(Descriptor {
            package: self.descriptor.package.clone(),
            service: self.descriptor.service.clone(),
            request_fields,
        });
        self
    }

    pub fn type_name(&self) -> String {
        format!("{}/srv/{}", self.descriptor.package, self.descriptor.service)
    }

    pub fn request_type_name(&self) -> String {
        format!("{}_Request", self.type_name())
    }

    pub fn serialize_request<T: Serialize + ?Sized>(&self, request: &T) -> Result<Vec<u8>, Error> {
        let value = serde_json::to_value(request).map_err(|err| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("request is not serializable as {}", self.request_type_name()))
                .with_source(err)
        })?;
        self.check_fields(&value)?;
        serde_json::to_vec(&value).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request")
                .with_source(err)
        })
    }

    fn check_fields(&self, value: &Value) -> Result<(), Error> {
        let Some(fields) = &self.descriptor.request_fields else {
            return Ok(());
        };
        let object = value.as_object().ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("{} must be an object", self.request_type_name()))
        })?;
        if let Some(missing) = fields.iter().find(|field| !object.contains_key(field.as_str())) {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("{} is missing field {missing:?}", self.request_type_name())));
        }
        if let Some(extra) = object.keys().find(|key| !fields.iter().any(|field| field == *key)) {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("{} has unknown field {extra:?}", self.request_type_name())));
        }
        Ok(())
    }
}
