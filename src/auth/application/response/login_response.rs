use serde::Deserialize;

#[derive(Deserialize)]
pub struct LoginResponse {
    #[serde(rename = "loginresponse")]
    pub data: LoginResponseData,
}

#[derive(Deserialize)]
pub struct LoginResponseData {
    #[serde(rename = "sessionkey")]
    pub session_key: String,
    #[serde(default)]
    pub username: Option<String>,
}
