use tandem_core::ClientError;

/// Map a kube error onto the classification the reconcilers act on.
pub fn classify(err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => ClientError::NotFound(resp.message),
            409 if resp.reason == "AlreadyExists" => ClientError::AlreadyExists(resp.message),
            409 => ClientError::Conflict(resp.message),
            code => ClientError::Api { code, message: resp.message },
        },
        other => ClientError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use kube::core::ErrorResponse;

    use super::*;

    fn api(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{reason} happened"),
            reason: reason.into(),
            code,
        })
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert!(classify(api(404, "NotFound")).is_not_found());
        assert!(classify(api(409, "AlreadyExists")).is_already_exists());
        assert_eq!(classify(api(409, "Conflict")), ClientError::Conflict("Conflict happened".into()));
        assert_eq!(
            classify(api(500, "InternalError")),
            ClientError::Api { code: 500, message: "InternalError happened".into() }
        );
        assert!(matches!(classify(kube::Error::LinesCodecMaxLineLengthExceeded), ClientError::Transport(_)));
    }
}
