//! Integration tests for SMS reassembly and deletion.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use wwand::services::modem::{
    CommandTransport, Modem, ModemError, ModemEvent, ModemService, NullPublisher,
    sms::SmsPart,
};
use zbus::zvariant::OwnedObjectPath;

#[derive(Default)]
struct ScriptedTransport {
    sent: Mutex<Vec<String>>,
    failing: Mutex<Vec<&'static str>>,
}

impl ScriptedTransport {
    fn failing_on(pattern: &'static str) -> Self {
        let transport = Self::default();
        transport.failing.lock().unwrap().push(pattern);
        transport
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandTransport for ScriptedTransport {
    async fn send(&self, command: &str, _timeout: Duration) -> Result<String, ModemError> {
        self.sent.lock().unwrap().push(command.to_string());
        let failing = self.failing.lock().unwrap().clone();
        if failing.iter().any(|pattern| command.contains(pattern)) {
            return Err(ModemError::ProtocolFailure {
                operation: "command",
                reason: format!("device rejected '{command}'"),
            });
        }
        Ok("OK".to_string())
    }

    async fn send_ignoring_reply(&self, _command: &str) {}
}

async fn service_with_modem(
    transport: Arc<ScriptedTransport>,
) -> (ModemService, Arc<Modem>, OwnedObjectPath) {
    let service = ModemService::new(Arc::new(NullPublisher));
    let modem = service
        .add_modem("ttyUSB0", transport)
        .await
        .unwrap()
        .unwrap();
    let path = modem.path().clone();
    (service, modem, path)
}

fn drain_added(rx: &mut tokio::sync::broadcast::Receiver<ModemEvent>) -> Vec<OwnedObjectPath> {
    let mut added = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ModemEvent::SmsAdded { sms, .. } = event {
            added.push(sms);
        }
    }
    added
}

fn drain_deleted(rx: &mut tokio::sync::broadcast::Receiver<ModemEvent>) -> Vec<OwnedObjectPath> {
    let mut deleted = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ModemEvent::SmsDeleted { sms } = event {
            deleted.push(sms);
        }
    }
    deleted
}

mod reassembly {
    use super::*;

    #[tokio::test]
    async fn three_parts_in_order_announce_once_after_the_third() {
        let transport = Arc::new(ScriptedTransport::default());
        let (service, _modem, modem_path) = service_with_modem(transport).await;
        let mut events = service.events();

        for sequence in 1..=3u8 {
            service
                .take_sms_part(
                    &modem_path,
                    SmsPart::multipart(u32::from(sequence), vec![sequence], 21, sequence, 3),
                    true,
                )
                .await
                .unwrap();
            let expected = if sequence == 3 { 1 } else { 0 };
            assert_eq!(drain_added(&mut events).len(), expected);
        }
    }

    #[tokio::test]
    async fn three_parts_out_of_order_reassemble_in_sequence_order() {
        let transport = Arc::new(ScriptedTransport::default());
        let (service, modem, modem_path) = service_with_modem(transport).await;
        let mut events = service.events();

        for sequence in [3u8, 1, 2] {
            service
                .take_sms_part(
                    &modem_path,
                    SmsPart::multipart(u32::from(sequence), vec![sequence], 21, sequence, 3),
                    true,
                )
                .await
                .unwrap();
        }

        let added = drain_added(&mut events);
        assert_eq!(added.len(), 1);

        let message = modem.sms.message(&added[0]).await.unwrap();
        assert_eq!(message.assembled_payload().unwrap(), vec![1, 2, 3]);
        let sequences: Vec<u8> = message
            .parts()
            .iter()
            .map(|part| part.concat.unwrap().sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn duplicate_storage_index_does_not_disturb_the_existing_message() {
        let transport = Arc::new(ScriptedTransport::default());
        let (service, modem, modem_path) = service_with_modem(transport).await;

        let first = service
            .take_sms_part(&modem_path, SmsPart::single(8, b"kept".to_vec()), true)
            .await
            .unwrap();

        let error = service
            .take_sms_part(
                &modem_path,
                SmsPart::multipart(8, b"clash".to_vec(), 4, 1, 2),
                true,
            )
            .await
            .unwrap_err();

        assert!(matches!(error, ModemError::DuplicateIndex { index: 8 }));
        let message = modem.sms.message(&first).await.unwrap();
        assert_eq!(message.assembled_payload().unwrap(), b"kept");
        assert_eq!(modem.sms.count().await, 1);
    }

    #[tokio::test]
    async fn unknown_modem_is_not_found() {
        let transport = Arc::new(ScriptedTransport::default());
        let (service, _modem, _path) = service_with_modem(transport).await;
        let bogus = OwnedObjectPath::try_from("/org/wwand/Modem/99").unwrap();

        let error = service
            .take_sms_part(&bogus, SmsPart::single(1, vec![]), true)
            .await
            .unwrap_err();

        assert!(matches!(error, ModemError::NotFound { .. }));
    }
}

mod deletion {
    use super::*;

    #[tokio::test]
    async fn delete_issues_one_storage_delete_per_part() {
        let transport = Arc::new(ScriptedTransport::default());
        let (service, modem, modem_path) = service_with_modem(Arc::clone(&transport)).await;
        let mut events = service.events();

        for sequence in 1..=3u8 {
            service
                .take_sms_part(
                    &modem_path,
                    SmsPart::multipart(10 + u32::from(sequence), vec![sequence], 5, sequence, 3),
                    true,
                )
                .await
                .unwrap();
        }
        let added = drain_added(&mut events);
        assert_eq!(added.len(), 1);

        modem.delete_sms(&added[0]).await.unwrap();

        let sent = transport.sent();
        for index in 11..=13 {
            assert!(sent.contains(&format!("AT+CMGD={index}")));
        }
        assert_eq!(drain_deleted(&mut events), vec![added[0].clone()]);
        assert_eq!(modem.sms.count().await, 0);
    }

    #[tokio::test]
    async fn deleting_a_missing_message_is_not_found() {
        let transport = Arc::new(ScriptedTransport::default());
        let (_service, modem, _path) = service_with_modem(transport).await;
        let bogus = OwnedObjectPath::try_from("/org/wwand/SMS/42").unwrap();

        let error = modem.delete_sms(&bogus).await.unwrap_err();
        assert!(matches!(error, ModemError::NotFound { .. }));
    }

    #[tokio::test]
    async fn device_failure_does_not_roll_back_the_removal() {
        let transport = Arc::new(ScriptedTransport::failing_on("+CMGD"));
        let (service, modem, modem_path) = service_with_modem(transport).await;
        let mut events = service.events();

        let path = service
            .take_sms_part(&modem_path, SmsPart::single(3, b"doomed".to_vec()), true)
            .await
            .unwrap();
        drain_added(&mut events);

        let error = modem.delete_sms(&path).await.unwrap_err();
        assert!(matches!(error, ModemError::ProtocolFailure { .. }));

        // The registry removal stands and observers heard about it.
        assert_eq!(modem.sms.count().await, 0);
        assert_eq!(drain_deleted(&mut events), vec![path.clone()]);

        // A second delete finds nothing.
        let error = modem.delete_sms(&path).await.unwrap_err();
        assert!(matches!(error, ModemError::NotFound { .. }));
    }
}
