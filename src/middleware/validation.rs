use validator::{Validate, ValidationErrors};

use crate::error::{AppError, AppResult};

/// Run `validator` rules on a request payload, flattening field errors into one message
pub fn validate_payload<T: Validate>(payload: &T) -> AppResult<()> {
    payload
        .validate()
        .map_err(|e| AppError::InvalidInput(format!("Validation failed: {}", describe(&e))))
}

fn describe(errors: &ValidationErrors) -> String {
    let mut fields: Vec<String> = errors
        .field_errors()
        .into_iter()
        .map(|(field, errors)| {
            let messages: Vec<String> = errors
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            format!("{}: {}", field, messages.join(", "))
        })
        .collect();
    fields.sort();
    fields.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Validate)]
    struct Payload {
        #[validate(length(min = 1, message = "must not be empty"))]
        name: String,
        #[validate(range(min = 1))]
        count: u32,
    }

    #[test]
    fn test_messages_are_flattened() {
        let err = validate_payload(&Payload {
            name: String::new(),
            count: 0,
        })
        .unwrap_err();

        match err {
            AppError::InvalidInput(msg) => {
                assert_eq!(msg, "Validation failed: count: range; name: must not be empty");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_valid_payload_passes() {
        assert!(validate_payload(&Payload {
            name: "ok".into(),
            count: 1,
        })
        .is_ok());
    }
}
