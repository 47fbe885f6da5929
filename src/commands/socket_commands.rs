use serde::Deserialize;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::AppError;
use crate::models::media::MediaHash;
use crate::state::AppState;

/// Live-update subscription as requested by a socket client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub want_settings: bool,
    #[serde(default)]
    pub token: String,
    pub want_media_hash: Option<String>,
}

#[derive(Debug, Default)]
pub struct Subscription {
    pub settings: Option<UnboundedReceiver<()>>,
    pub media: Option<UnboundedReceiver<()>>,
}

pub fn subscribe(state: &AppState, request: &SubscribeRequest) -> Result<Subscription, AppError> {
    let mut subscription = Subscription::default();
    if request.want_settings {
        subscription.settings = Some(state.notifier.subscribe_settings(&request.token)?);
    }
    if let Some(hash) = request.want_media_hash.as_deref().filter(|h| !h.is_empty()) {
        subscription.media = Some(state.notifier.subscribe_media(&MediaHash::from(hash)));
    }
    Ok(subscription)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::test_state;

    #[test]
    fn test_settings_need_valid_token() {
        let (state, _fx) = test_state();
        let request = SubscribeRequest {
            want_settings: true,
            token: "nope".to_string(),
            want_media_hash: None,
        };
        assert!(matches!(subscribe(&state, &request), Err(AppError::Unauthorized)));

        let request = SubscribeRequest {
            token: "letmein".to_string(),
            ..request
        };
        let mut sub = subscribe(&state, &request).unwrap();
        assert_eq!(state.notifier.ping_settings(), 1);
        assert!(sub.settings.as_mut().unwrap().try_recv().is_ok());
        assert!(sub.media.is_none());
    }

    #[test]
    fn test_media_subscription_needs_no_token() {
        let (state, _fx) = test_state();
        let request: SubscribeRequest =
            serde_json::from_str(r#"{"want_media_hash":"aaaaaaaaaaaaaaaa"}"#).unwrap();

        let mut sub = subscribe(&state, &request).unwrap();
        assert!(sub.settings.is_none());
        assert_eq!(state.notifier.ping_media(&MediaHash::from("aaaaaaaaaaaaaaaa")), 1);
        assert!(sub.media.as_mut().unwrap().try_recv().is_ok());
    }
}
