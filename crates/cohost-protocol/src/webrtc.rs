//! WebRTC backend built on `webrtc-rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cohost_types::{IceCandidate, IceServer, MediaKind};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::ProtocolError;
use crate::rtc::{
    LocalTrack, RemoteTrack, RtcBackend, RtcConfig, RtcConnection, RtcEvent, RtcState,
    DATA_CHANNEL_LABEL, EVENT_CHANNEL_CAPACITY,
};

/// Packets buffered per incoming track before new ones are discarded.
const REMOTE_TRACK_BUFFER: usize = 256;

fn negotiation(err: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Negotiation(err.to_string())
}

fn connection(err: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Connection(err.to_string())
}

/// Real WebRTC backend.
#[derive(Debug, Default)]
pub struct WebRtcBackend;

impl WebRtcBackend {
    pub fn new() -> Self {
        Self
    }

    fn build_api(config: &RtcConfig) -> Result<API, ProtocolError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs().map_err(connection)?;
        let registry = register_default_interceptors(Registry::new(), &mut media).map_err(connection)?;

        let mut settings = SettingEngine::default();
        settings.set_lite(config.ice_lite);
        if !config.nat1to1_ips.is_empty() {
            settings.set_nat_1to1_ips(config.nat1to1_ips.clone(), RTCIceCandidateType::Host);
        }
        if let Some((min, max)) = config.udp_port_range {
            match EphemeralUDP::new(min, max) {
                Ok(ephemeral) => settings.set_udp_network(UDPNetwork::Ephemeral(ephemeral)),
                Err(err) => warn!(min, max, error = %err, "invalid ICE port range, using defaults"),
            }
        }

        Ok(APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(settings)
            .build())
    }
}

fn ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn map_state(state: RTCPeerConnectionState) -> RtcState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => RtcState::New,
        RTCPeerConnectionState::Connecting => RtcState::Connecting,
        RTCPeerConnectionState::Connected => RtcState::Connected,
        RTCPeerConnectionState::Disconnected => RtcState::Disconnected,
        RTCPeerConnectionState::Failed => RtcState::Failed,
        RTCPeerConnectionState::Closed => RtcState::Closed,
    }
}

fn local_candidate(candidate: &RTCIceCandidate) -> Option<IceCandidate> {
    let init = candidate.to_json().ok()?;
    Some(IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    })
}

#[async_trait]
impl RtcBackend for WebRtcBackend {
    async fn create_connection(
        &self,
        config: &RtcConfig,
    ) -> Result<(Arc<dyn RtcConnection>, mpsc::Receiver<RtcEvent>), ProtocolError> {
        let api = Self::build_api(config)?;
        let rtc_config = RTCConfiguration {
            ice_servers: config.ice_servers.iter().map(ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(connection)?);
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let tx = events.clone();
        let trickle = config.ice_trickle;
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let event = match candidate {
                    Some(c) if trickle => match local_candidate(&c) {
                        Some(c) => RtcEvent::LocalCandidate(c),
                        None => return,
                    },
                    Some(_) => return,
                    None => RtcEvent::GatheringComplete,
                };
                let _ = tx.send(event).await;
            })
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let tx = tx.clone();
            Box::pin(async move {
                debug!(%state, "peer connection state changed");
                let _ = tx.send(RtcEvent::StateChanged(map_state(state))).await;
            })
        }));

        let tx = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    RTPCodecType::Unspecified => return,
                };
                let (packets_tx, packets_rx) = mpsc::channel(REMOTE_TRACK_BUFFER);
                let remote = RemoteTrack {
                    kind,
                    id: track.id(),
                    packets: packets_rx,
                };
                if tx.send(RtcEvent::RemoteTrack(remote)).await.is_err() {
                    return;
                }
                tokio::spawn(async move {
                    // Keep reading even once the consumer is gone so the
                    // sender is not stalled by a full receive buffer.
                    while let Ok((packet, _)) = track.read_rtp().await {
                        if !packets_tx.is_closed() {
                            let _ = packets_tx.try_send(packet.payload);
                        }
                    }
                    trace!(kind = %kind, "remote track ended");
                });
            })
        }));

        let data = pc
            .create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .map_err(connection)?;
        wire_data_channel(&data, &events);

        let conn = WebRtcConnection {
            pc,
            data,
            paused: Arc::new(AtomicBool::new(false)),
        };
        Ok((Arc::new(conn), events_rx))
    }
}

fn wire_data_channel(data: &Arc<RTCDataChannel>, events: &mpsc::Sender<RtcEvent>) {
    let tx = events.clone();
    data.on_open(Box::new(move || {
        Box::pin(async move {
            let _ = tx.send(RtcEvent::DataChannelOpen).await;
        })
    }));

    let tx = events.clone();
    data.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(RtcEvent::DataChannelClose).await;
        })
    }));

    let tx = events.clone();
    data.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(RtcEvent::DataChannelMessage(msg.data)).await;
        })
    }));
}

struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    data: Arc<RTCDataChannel>,
    paused: Arc<AtomicBool>,
}

impl WebRtcConnection {
    async fn local_sdp(&self) -> Result<String, ProtocolError> {
        self.pc
            .local_description()
            .await
            .map(|d| d.sdp)
            .ok_or_else(|| negotiation("no local description"))
    }
}

#[async_trait]
impl RtcConnection for WebRtcConnection {
    async fn add_local_track(&self, track: LocalTrack) -> Result<(), ProtocolError> {
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: track.mime_type.clone(),
                ..Default::default()
            },
            track.id.clone(),
            track.stream_id.clone(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(connection)?;

        // Drain RTCP so interceptors keep running.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let kind = track.kind;
        let mut samples = track.samples;
        let paused = Arc::clone(&self.paused);
        tokio::spawn(async move {
            loop {
                match samples.recv().await {
                    Ok(_) if paused.load(Ordering::Relaxed) => {}
                    Ok(sample) => {
                        let sample = Sample {
                            data: sample.data,
                            duration: sample.duration,
                            ..Default::default()
                        };
                        if let Err(err) = local.write_sample(&sample).await {
                            trace!(%kind, error = %err, "dropping media sample");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(%kind, skipped, "media track lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    async fn create_offer(&self, wait_for_gathering: bool) -> Result<String, ProtocolError> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation)?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(negotiation)?;
        if wait_for_gathering {
            let _ = gathered.recv().await;
        }
        self.local_sdp().await
    }

    async fn set_remote_answer(&self, sdp: &str) -> Result<(), ProtocolError> {
        let answer = RTCSessionDescription::answer(sdp.to_string()).map_err(negotiation)?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(negotiation)
    }

    async fn set_remote_offer(
        &self,
        sdp: &str,
        wait_for_gathering: bool,
    ) -> Result<String, ProtocolError> {
        let offer = RTCSessionDescription::offer(sdp.to_string()).map_err(negotiation)?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(negotiation)?;
        let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(negotiation)?;
        if wait_for_gathering {
            let _ = gathered.recv().await;
        }
        self.local_sdp().await
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), ProtocolError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await.map_err(negotiation)
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    async fn send_data(&self, data: Bytes) -> Result<(), ProtocolError> {
        self.data
            .send(&data)
            .await
            .map(|_| ())
            .map_err(|_| ProtocolError::ChannelClosed)
    }

    async fn close(&self) -> Result<(), ProtocolError> {
        self.pc.close().await.map_err(connection)
    }
}
