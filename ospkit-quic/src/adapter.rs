// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Quinn adapter: real QUIC underneath the sans-IO managers.
//!
//! TLS runs with ALPN `osp` and no PKI. The server presents a self-signed
//! agent certificate; clients pin the peer by the SHA-256 fingerprint of its
//! leaf certificate learned from the discovery `fp=` TXT record. The adapter
//! translates quinn's async events into [`TransportEvent`] values the
//! embedder feeds to a `QuicServer`/`QuicClient` on its own task.
//!
//! Everything here runs on a current-thread runtime (`spawn_local`), matching
//! the single-owner model of the managers.

use std::cell::Cell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use ospkit_common::{Error, Fingerprint, StreamId};
use quinn::{ClientConfig, Endpoint};
use rustls::pki_types::CertificateDer;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::transport::{QuicConnectionHandle, QuicStreamHandle};

/// ALPN protocol id for the Open Screen Protocol.
pub const ALPN_OSP: &[u8] = b"osp";

/// Generate a self-signed agent certificate for `hostname`.
///
/// Returns (certificate DER, PKCS#8 private key DER).
pub fn generate_agent_certificate(hostname: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let key_pair = rcgen::KeyPair::generate().context("failed to generate key pair")?;
    let mut params = rcgen::CertificateParams::new(vec![hostname.to_owned()])
        .context("failed to create certificate params")?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, hostname);
    let cert = params
        .self_signed(&key_pair)
        .context("failed to self-sign certificate")?;
    Ok((cert.der().to_vec(), key_pair.serialize_der()))
}

/// Certificate verifier that pins the peer's leaf certificate fingerprint.
///
/// The expected fingerprint comes from the specific peer's discovery TXT
/// record; a mismatch fails the TLS handshake before any protocol data flows.
#[derive(Debug, Clone)]
pub struct FingerprintVerifier {
    expected: Fingerprint,
}

impl FingerprintVerifier {
    pub fn new(expected: Fingerprint) -> Self {
        Self { expected }
    }
}

impl rustls::client::danger::ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        let actual = Fingerprint::from_leaf_der(end_entity.as_ref());
        if actual != self.expected {
            error!(
                expected = %self.expected.to_base64(),
                actual = %actual.to_base64(),
                "certificate fingerprint mismatch"
            );
            return Err(rustls::Error::General(
                Error::FingerprintMismatch.to_string(),
            ));
        }
        debug!(fingerprint = %actual.to_base64(), "peer certificate pinned");
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts any client certificate.
///
/// The certificate is only used for fingerprint extraction; actual peer
/// authentication happens at the SPAKE2 layer.
#[derive(Debug)]
pub struct AcceptAnyClientCert;

impl rustls::server::danger::ClientCertVerifier for AcceptAnyClientCert {
    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::server::danger::ClientCertVerified, rustls::Error> {
        Ok(rustls::server::danger::ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a server endpoint presenting the agent certificate.
pub fn build_server_endpoint(
    bind_addr: SocketAddr,
    cert_der: Vec<u8>,
    key_der: Vec<u8>,
) -> Result<Endpoint> {
    let mut server_crypto = rustls::ServerConfig::builder()
        .with_client_cert_verifier(Arc::new(AcceptAnyClientCert))
        .with_single_cert(
            vec![CertificateDer::from(cert_der)],
            rustls::pki_types::PrivateKeyDer::Pkcs8(key_der.into()),
        )
        .context("failed to create TLS server config")?;
    server_crypto.alpn_protocols = vec![ALPN_OSP.to_vec()];

    let server_config = quinn::ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
            .context("failed to create QUIC server config")?,
    ));
    Endpoint::server(server_config, bind_addr).context("failed to bind server endpoint")
}

/// Build a client endpoint pinned to `expected_fingerprint`.
pub fn build_client_endpoint(
    bind_addr: SocketAddr,
    expected_fingerprint: Fingerprint,
    cert_der: Vec<u8>,
    key_der: Vec<u8>,
) -> Result<Endpoint> {
    let mut client_crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(FingerprintVerifier::new(expected_fingerprint)))
        .with_client_auth_cert(
            vec![CertificateDer::from(cert_der)],
            rustls::pki_types::PrivateKeyDer::Pkcs8(key_der.into()),
        )
        .context("failed to create TLS client config")?;
    client_crypto.alpn_protocols = vec![ALPN_OSP.to_vec()];

    let client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
            .context("failed to create QUIC client config")?,
    ));
    let mut endpoint = Endpoint::client(bind_addr).context("failed to bind client endpoint")?;
    endpoint.set_default_client_config(client_config);
    Ok(endpoint)
}

/// Transport events the embedder forwards into a manager.
pub enum TransportEvent {
    IncomingStream {
        instance_name: String,
        stream: QuinnStreamHandle,
    },
    StreamData {
        instance_name: String,
        stream_id: StreamId,
        bytes: Vec<u8>,
    },
    StreamClosed {
        instance_name: String,
        stream_id: StreamId,
    },
    ConnectionClosed {
        instance_name: String,
    },
}

enum WriteCommand {
    Data(Vec<u8>),
    Finish,
}

/// Sync write half over an async quinn stream: commands flow through an
/// in-order queue to a writer task, preserving FIFO within the stream.
pub struct QuinnStreamHandle {
    stream_id: StreamId,
    commands: mpsc::UnboundedSender<WriteCommand>,
}

impl QuicStreamHandle for QuinnStreamHandle {
    fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    fn write(&mut self, bytes: &[u8]) -> ospkit_common::Result<()> {
        self.commands
            .send(WriteCommand::Data(bytes.to_vec()))
            .map_err(|_| Error::NoActiveConnection)
    }

    fn close_write(&mut self) -> ospkit_common::Result<()> {
        self.commands
            .send(WriteCommand::Finish)
            .map_err(|_| Error::NoActiveConnection)
    }
}

fn spawn_stream_writer(mut send: quinn::SendStream) -> mpsc::UnboundedSender<WriteCommand> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::task::spawn_local(async move {
        while let Some(command) = rx.recv().await {
            match command {
                WriteCommand::Data(bytes) => {
                    if let Err(err) = send.write_all(&bytes).await {
                        debug!(%err, "stream write failed");
                        break;
                    }
                }
                WriteCommand::Finish => {
                    let _ = send.finish();
                    break;
                }
            }
        }
    });
    tx
}

async fn pump_recv_stream(
    mut recv: quinn::RecvStream,
    instance_name: String,
    stream_id: StreamId,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    loop {
        match recv.read_chunk(4096, true).await {
            Ok(Some(chunk)) => {
                trace!(instance_name, stream_id, len = chunk.bytes.len(), "rx");
                if events
                    .send(TransportEvent::StreamData {
                        instance_name: instance_name.clone(),
                        stream_id,
                        bytes: chunk.bytes.to_vec(),
                    })
                    .is_err()
                {
                    return;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!(instance_name, stream_id, %err, "stream read failed");
                break;
            }
        }
    }
    let _ = events.send(TransportEvent::StreamClosed {
        instance_name,
        stream_id,
    });
}

/// Manager-facing handle for one quinn connection.
pub struct QuinnConnectionHandle {
    instance_name: String,
    connection: quinn::Connection,
    events: mpsc::UnboundedSender<TransportEvent>,
    next_stream_id: Rc<Cell<StreamId>>,
}

impl QuinnConnectionHandle {
    pub fn new(
        instance_name: String,
        connection: quinn::Connection,
        events: mpsc::UnboundedSender<TransportEvent>,
        next_stream_id: Rc<Cell<StreamId>>,
    ) -> Self {
        Self {
            instance_name,
            connection,
            events,
            next_stream_id,
        }
    }

    fn allocate_stream_id(&self) -> StreamId {
        let id = self.next_stream_id.get();
        self.next_stream_id.set(id + 1);
        id
    }
}

impl QuicConnectionHandle for QuinnConnectionHandle {
    fn open_stream(&mut self) -> ospkit_common::Result<Box<dyn QuicStreamHandle>> {
        let stream_id = self.allocate_stream_id();
        let (tx, mut rx) = mpsc::unbounded_channel::<WriteCommand>();
        let connection = self.connection.clone();
        let instance_name = self.instance_name.clone();
        let events = self.events.clone();

        // Writes enqueued before the stream finishes opening are flushed in
        // order once it has.
        tokio::task::spawn_local(async move {
            let (mut send, recv) = match connection.open_bi().await {
                Ok(pair) => pair,
                Err(err) => {
                    debug!(instance_name, %err, "failed to open stream");
                    return;
                }
            };
            tokio::task::spawn_local(pump_recv_stream(
                recv,
                instance_name.clone(),
                stream_id,
                events,
            ));
            while let Some(command) = rx.recv().await {
                match command {
                    WriteCommand::Data(bytes) => {
                        if let Err(err) = send.write_all(&bytes).await {
                            debug!(instance_name, %err, "stream write failed");
                            break;
                        }
                    }
                    WriteCommand::Finish => {
                        let _ = send.finish();
                        break;
                    }
                }
            }
        });

        Ok(Box::new(QuinnStreamHandle {
            stream_id,
            commands: tx,
        }))
    }

    fn close(&mut self) {
        self.connection.close(0u32.into(), b"closed");
    }
}

/// Accept peer-opened streams and pump their data until the connection dies.
///
/// The embedder spawns this once per established connection (after the crypto
/// handshake) on its local task set, with the same stream id allocator the
/// connection handle uses.
pub async fn drive_connection(
    instance_name: String,
    connection: quinn::Connection,
    events: mpsc::UnboundedSender<TransportEvent>,
    next_stream_id: Rc<Cell<StreamId>>,
) {
    loop {
        match connection.accept_bi().await {
            Ok((send, recv)) => {
                let stream_id = next_stream_id.get();
                next_stream_id.set(stream_id + 1);

                let commands = spawn_stream_writer(send);
                if events
                    .send(TransportEvent::IncomingStream {
                        instance_name: instance_name.clone(),
                        stream: QuinnStreamHandle { stream_id, commands },
                    })
                    .is_err()
                {
                    return;
                }
                tokio::task::spawn_local(pump_recv_stream(
                    recv,
                    instance_name.clone(),
                    stream_id,
                    events.clone(),
                ));
            }
            Err(err) => {
                debug!(instance_name, %err, "connection closed");
                let _ = events.send(TransportEvent::ConnectionClosed { instance_name });
                return;
            }
        }
    }
}
