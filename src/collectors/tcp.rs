use crate::collectors::crypto::decrypt_package;
use crate::config::{EncryptionMode, EncryptionSettings};
use crate::error::FetchError;
use anyhow::{anyhow, Context};
use log::debug;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

enum TcpFailure {
    Agent(String),
    Other(anyhow::Error),
}

impl From<anyhow::Error> for TcpFailure {
    fn from(e: anyhow::Error) -> Self {
        TcpFailure::Other(e)
    }
}

async fn read_agent(ipaddress: &str, port: u16, connect_timeout: Duration) -> anyhow::Result<Vec<u8>> {
    debug!("Connecting via TCP to {}:{}", ipaddress, port);
    let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect((ipaddress, port)))
        .await
        .map_err(|_| anyhow!("timed out"))?
        .context("connect failed")?;

    // The stream is closed when dropped, also if the caller's deadline
    // cancels this future.
    let mut output = Vec::new();
    stream.read_to_end(&mut output).await?;
    Ok(output)
}

fn unwrap_encryption(output: Vec<u8>, encryption: &EncryptionSettings) -> Result<Vec<u8>, TcpFailure> {
    let mode = encryption.mode();
    if mode == EncryptionMode::Enforce && output.starts_with(b"<<<check_mk>>>") {
        return Err(anyhow!("Agent output is plaintext but encryption is enforced by configuration").into());
    }
    if mode == EncryptionMode::Disabled {
        return Ok(output);
    }

    // The first two bytes carry the protocol version.
    let payload = output.get(2..).unwrap_or_default();
    match decrypt_package(payload, &encryption.passphrase) {
        Ok(plain) => Ok(plain),
        Err(e) if mode == EncryptionMode::Enforce => {
            Err(anyhow!("Failed to decrypt agent output: {}", e).into())
        }
        Err(e) => {
            debug!("Agent output is not encrypted, using it as is: {}", e);
            Ok(output)
        }
    }
}

async fn try_fetch_tcp(
    ipaddress: &str,
    port: u16,
    connect_timeout: Duration,
    encryption: &EncryptionSettings,
) -> Result<Vec<u8>, TcpFailure> {
    let output = read_agent(ipaddress, port, connect_timeout).await?;
    if output.is_empty() {
        // May be caused by xinetd not allowing our address
        return Err(TcpFailure::Agent(format!(
            "Empty output from agent at TCP port {}",
            port
        )));
    }
    unwrap_encryption(output, encryption)
}

/// Reads the complete output of the agent listening on `ipaddress:port`.
pub async fn fetch_tcp(
    ipaddress: &str,
    port: u16,
    connect_timeout: Duration,
    encryption: &EncryptionSettings,
) -> Result<Vec<u8>, FetchError> {
    let start = Instant::now();
    let result = try_fetch_tcp(ipaddress, port, connect_timeout, encryption).await;
    debug!("fetch_tcp took: {} ms", start.elapsed().as_millis());

    result.map_err(|failure| match failure {
        TcpFailure::Agent(msg) => FetchError::Agent(msg),
        TcpFailure::Other(e) => FetchError::Agent(format!(
            "Cannot get data from TCP port {}:{}: {:#}",
            ipaddress, port, e
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
    use md5::{Digest, Md5};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn serve_once(payload: Vec<u8>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&payload).await.unwrap();
        });
        port
    }

    fn settings(mode: &str, passphrase: &str) -> EncryptionSettings {
        EncryptionSettings {
            use_regular: mode.to_string(),
            passphrase: passphrase.to_string(),
        }
    }

    fn encrypt(plain: &[u8], passphrase: &str) -> Vec<u8> {
        let mut derived = Vec::new();
        let mut block = Vec::new();
        while derived.len() < 48 {
            let mut hasher = Md5::new();
            hasher.update(&block);
            hasher.update(passphrase.as_bytes());
            block = hasher.finalize().to_vec();
            derived.extend_from_slice(&block);
        }
        let mut package = b"00".to_vec();
        package.extend(
            cbc::Encryptor::<aes::Aes256>::new_from_slices(&derived[..32], &derived[32..48])
                .unwrap()
                .encrypt_padded_vec_mut::<Pkcs7>(plain),
        );
        package
    }

    #[tokio::test]
    async fn test_plain_agent_output() {
        let port = serve_once(b"<<<check_mk>>>\nVersion: 1.4.0\n".to_vec()).await;
        let output = fetch_tcp("127.0.0.1", port, Duration::from_secs(5), &EncryptionSettings::default())
            .await
            .unwrap();
        assert!(output.starts_with(b"<<<check_mk>>>"));
    }

    #[tokio::test]
    async fn test_empty_output_is_an_agent_error() {
        let port = serve_once(Vec::new()).await;
        let err = fetch_tcp("127.0.0.1", port, Duration::from_secs(5), &EncryptionSettings::default())
            .await
            .unwrap_err();
        assert_eq!(err.message(), format!("Empty output from agent at TCP port {}", port));
    }

    #[tokio::test]
    async fn test_encrypted_output_is_decrypted() {
        let plain = b"<<<check_mk>>>\nVersion: 1.4.0\n";
        let port = serve_once(encrypt(plain, "secret")).await;
        let output = fetch_tcp("127.0.0.1", port, Duration::from_secs(5), &settings("enforce", "secret"))
            .await
            .unwrap();
        assert_eq!(output, plain);
    }

    #[tokio::test]
    async fn test_enforced_encryption_rejects_plaintext() {
        let port = serve_once(b"<<<check_mk>>>\nVersion: 1.4.0\n".to_vec()).await;
        let err = fetch_tcp("127.0.0.1", port, Duration::from_secs(5), &settings("enforce", "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Agent(_)));
        assert!(err.message().contains("plaintext"));
    }

    #[tokio::test]
    async fn test_optional_encryption_falls_back_to_plaintext() {
        let payload = b"xx<<<uptime>>>\n42 1\n".to_vec();
        let port = serve_once(payload.clone()).await;
        let output = fetch_tcp("127.0.0.1", port, Duration::from_secs(5), &settings("allow", "secret"))
            .await
            .unwrap();
        assert_eq!(output, payload);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = fetch_tcp("127.0.0.1", port, Duration::from_secs(5), &EncryptionSettings::default())
            .await
            .unwrap_err();
        assert!(err
            .message()
            .starts_with(&format!("Cannot get data from TCP port 127.0.0.1:{}", port)));
    }
}
