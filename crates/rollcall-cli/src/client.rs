//! D-Bus client proxy for rollcalld.

use zbus::proxy;

#[proxy(
    interface = "org.freedesktop.Rollcall1",
    default_service = "org.freedesktop.Rollcall1",
    default_path = "/org/freedesktop/Rollcall1"
)]
pub trait Rollcall {
    async fn register_identity(
        &self,
        display_name: &str,
        roll_code: &str,
    ) -> zbus::Result<String>;

    async fn enroll(
        &self,
        identity_id: &str,
        descriptors_json: &str,
        replace: bool,
    ) -> zbus::Result<String>;

    async fn verify_face(
        &self,
        subject: &str,
        descriptor_json: &str,
        session_id: &str,
    ) -> zbus::Result<String>;

    async fn create_session(&self, request_json: &str) -> zbus::Result<String>;

    async fn scan_session_token(&self, payload: &str) -> zbus::Result<String>;

    async fn scan_identity_token(
        &self,
        session_id: &str,
        identity_id: &str,
    ) -> zbus::Result<String>;

    async fn scan_identity_payload(
        &self,
        session_id: &str,
        payload: &str,
    ) -> zbus::Result<String>;

    async fn end_session(&self, session_id: &str) -> zbus::Result<String>;

    async fn active_sessions(&self) -> zbus::Result<String>;

    async fn session_stats(&self, session_id: &str) -> zbus::Result<String>;

    async fn query_events(&self, filters_json: &str) -> zbus::Result<String>;

    async fn purge_events(&self, filters_json: &str) -> zbus::Result<String>;

    async fn status(&self) -> zbus::Result<String>;
}
