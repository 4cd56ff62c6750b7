//! Contactless transaction responder
//!
//! Synchronous `process_apdu(bytes) -> bytes` for the host's APDU callback.
//! Each command is answered from the active token slot alone; the only state
//! kept between commands is the selected AID. No I/O happens here.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::apdu::{ins, parse_apdu, APDUError, Response, APDU, SW};
use crate::config::ResponderConfig;
use crate::crypto::{amount_from_cdol, generate_cryptogram};
use crate::tlv::hexify;

use super::aid::{Scheme, SelectTarget};
use super::slot::{ActiveTokenSlot, PaymentPayload};
use super::templates;
use super::TapError;

/// Progress of the current tap, for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Idle,
    AidSelected,
    GpoDone,
    RecordRead,
}

/// Why the host ended the contactless session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationReason {
    /// Field lost (phone moved away from the reader)
    LinkLoss,
    /// Terminal selected a different application
    Deselected,
    Other(i32),
}

impl DeactivationReason {
    /// Map a host deactivation code (0 = link loss, 1 = deselected)
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DeactivationReason::LinkLoss,
            1 => DeactivationReason::Deselected,
            other => DeactivationReason::Other(other),
        }
    }
}

/// Emulated EMV payment card
pub struct PaymentResponder {
    slot: Arc<ActiveTokenSlot>,
    config: ResponderConfig,
    selected_aid: Option<Vec<u8>>,
    state: TapState,
}

impl PaymentResponder {
    /// Responder reading from `slot` with default configuration
    pub fn new(slot: Arc<ActiveTokenSlot>) -> Self {
        Self::with_config(slot, ResponderConfig::default())
    }

    pub fn with_config(slot: Arc<ActiveTokenSlot>, config: ResponderConfig) -> Self {
        Self {
            slot,
            config,
            selected_aid: None,
            state: TapState::Idle,
        }
    }

    /// Responder bound to the process-wide slot
    pub fn shared() -> Self {
        Self::new(ActiveTokenSlot::shared())
    }

    /// Answer one command APDU. Always returns data plus a status word.
    pub fn process_apdu(&mut self, apdu_bytes: &[u8]) -> Vec<u8> {
        let response = match self.dispatch(apdu_bytes) {
            Ok(response) => response,
            Err(e) => {
                warn!("APDU rejected: {} ({})", e, SW::name(e.status_word()));
                Response::error(e.status_word())
            }
        };
        debug!("Response SW={:04X} len={}", response.sw(), response.data.len());
        response.to_bytes()
    }

    /// Host signalled the end of the contactless session
    ///
    /// Clears the selected AID only; the slot belongs to the app.
    pub fn on_deactivated(&mut self, reason: DeactivationReason) {
        self.selected_aid = None;
        self.state = TapState::Idle;
        debug!("HCE deactivated: {:?}", reason);
    }

    pub fn selected_aid(&self) -> Option<&[u8]> {
        self.selected_aid.as_deref()
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    fn dispatch(&mut self, apdu_bytes: &[u8]) -> Result<Response, TapError> {
        if apdu_bytes.len() < 4 {
            warn!("APDU too short: {} bytes", apdu_bytes.len());
            return Err(APDUError::TooShort(apdu_bytes.len()).into());
        }

        let code = apdu_bytes[1];
        debug!("APDU INS=0x{:02X}, len={}", code, apdu_bytes.len());

        match code {
            ins::SELECT => {
                let cmd = parse_apdu(apdu_bytes)?;
                self.handle_select(&cmd)
            }
            ins::GET_PROCESSING_OPTIONS => {
                self.credential()?;
                parse_apdu(apdu_bytes)?;
                self.handle_gpo()
            }
            ins::READ_RECORD => {
                let payload = self.credential()?;
                parse_apdu(apdu_bytes)?;
                self.handle_read_record(&payload)
            }
            ins::GENERATE_AC => {
                let payload = self.credential()?;
                let cmd = parse_apdu(apdu_bytes)?;
                self.handle_generate_ac(&cmd, &payload)
            }
            other => Err(TapError::UnknownInstruction(other)),
        }
    }

    /// Snapshot of a usable credential
    fn credential(&self) -> Result<Arc<PaymentPayload>, TapError> {
        let payload = self.slot.get().ok_or(TapError::NoCredential)?;
        if self.config.reject_expired && payload.is_expired() {
            return Err(TapError::CredentialExpired);
        }
        Ok(payload)
    }

    fn handle_select(&mut self, cmd: &APDU) -> Result<Response, TapError> {
        match SelectTarget::from_data(&cmd.data) {
            Some(SelectTarget::Ppse) => {
                let scheme = self.slot.scheme().unwrap_or(Scheme::Visa);
                debug!("SELECT PPSE, advertising {}", scheme);
                Ok(Response::success(templates::ppse_response(
                    scheme.aid(),
                    &self.config.app_label,
                )))
            }
            Some(SelectTarget::Application(scheme)) => {
                info!("SELECT AID: {}", scheme.label());
                self.selected_aid = Some(cmd.data.clone());
                self.state = TapState::AidSelected;
                Ok(Response::success(templates::select_response(
                    scheme.aid(),
                    scheme.label(),
                    Some(&templates::PDOL),
                )))
            }
            None => {
                warn!("SELECT unknown AID: {}", hexify(&cmd.data));
                Err(TapError::UnknownApplication)
            }
        }
    }

    fn handle_gpo(&mut self) -> Result<Response, TapError> {
        debug!("GET PROCESSING OPTIONS");
        self.state = TapState::GpoDone;
        Ok(Response::success(templates::gpo_response(&templates::AIP, &templates::AFL)))
    }

    fn handle_read_record(&mut self, payload: &PaymentPayload) -> Result<Response, TapError> {
        debug!("READ RECORD: {} ATC={}", payload.masked_dpan(), payload.atc);
        let record = templates::record_response(
            &payload.dpan,
            payload.expiry_year,
            payload.expiry_month,
            payload.atc,
        )?;
        self.state = TapState::RecordRead;
        Ok(Response::success(record))
    }

    fn handle_generate_ac(
        &mut self,
        cmd: &APDU,
        payload: &PaymentPayload,
    ) -> Result<Response, TapError> {
        let amount = amount_from_cdol(&cmd.data);
        debug!("GENERATE AC: computing ARQC with ATC={}", payload.atc);

        let cryptogram = generate_cryptogram(&payload.session_key, payload.atc, amount, &cmd.data)?;
        Ok(Response::success(templates::generate_ac_response(
            templates::CID_ARQC,
            payload.atc,
            &cryptogram,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emv::slot::tests::sample_payload;
    use crate::emv::{AID_MASTERCARD, AID_VISA, PPSE};
    use crate::tlv::{find_in, read_list, tags};
    use chrono::{Duration, Utc};

    const SELECT_PPSE: &str = "00A404000E325041592E5359532E444446303100";

    fn responder_with(payload: Option<PaymentPayload>) -> (Arc<ActiveTokenSlot>, PaymentResponder) {
        let slot = Arc::new(ActiveTokenSlot::new());
        if let Some(p) = payload {
            slot.set(p);
        }
        let responder = PaymentResponder::new(Arc::clone(&slot));
        (slot, responder)
    }

    fn select(aid: &[u8]) -> Vec<u8> {
        APDU::with_data(0x00, ins::SELECT, 0x04, 0x00, aid.to_vec()).expect(256).to_bytes()
    }

    fn sw(resp: &[u8]) -> u16 {
        SW::trailer(resp).unwrap()
    }

    fn data(resp: &[u8]) -> &[u8] {
        &resp[..resp.len() - 2]
    }

    #[test]
    fn test_select_ppse_advertises_slot_scheme() {
        for scheme in [Scheme::Visa, Scheme::Mastercard] {
            let (_, mut r) = responder_with(Some(sample_payload(scheme, 0)));
            let resp = r.process_apdu(&hex::decode(SELECT_PPSE).unwrap());
            assert_eq!(sw(&resp), SW::SUCCESS);
            let tlvs = read_list(data(&resp), true);
            assert_eq!(find_in(&tlvs, tags::DF_NAME).unwrap().value, PPSE.to_vec());
            assert_eq!(find_in(&tlvs, tags::AID).unwrap().value, scheme.aid().to_vec());
            assert_eq!(find_in(&tlvs, tags::APPLICATION_LABEL).unwrap().value, b"EU Pay".to_vec());
        }
    }

    #[test]
    fn test_select_ppse_empty_slot_defaults_to_visa() {
        let (_, mut r) = responder_with(None);
        let resp = r.process_apdu(&select(PPSE));
        assert_eq!(sw(&resp), SW::SUCCESS);
        let tlvs = read_list(data(&resp), true);
        assert_eq!(find_in(&tlvs, tags::AID).unwrap().value, AID_VISA.to_vec());
    }

    #[test]
    fn test_select_aid_records_selection() {
        let (_, mut r) = responder_with(None);
        let resp = r.process_apdu(&select(&AID_MASTERCARD));
        assert_eq!(sw(&resp), SW::SUCCESS);
        assert_eq!(r.selected_aid(), Some(&AID_MASTERCARD[..]));
        assert_eq!(r.state(), TapState::AidSelected);

        let tlvs = read_list(data(&resp), true);
        assert_eq!(find_in(&tlvs, tags::DF_NAME).unwrap().value, AID_MASTERCARD.to_vec());
        assert_eq!(find_in(&tlvs, tags::APPLICATION_LABEL).unwrap().value, b"MASTERCARD".to_vec());
        assert_eq!(find_in(&tlvs, tags::PDOL).unwrap().value, templates::PDOL.to_vec());
    }

    #[test]
    fn test_select_unknown_aid() {
        let (_, mut r) = responder_with(Some(sample_payload(Scheme::Visa, 0)));
        let resp = r.process_apdu(&select(&[0xA0, 0x00, 0x00, 0x00, 0x25, 0x01]));
        assert_eq!(resp, vec![0x6A, 0x82]);
        assert!(r.selected_aid().is_none());
    }

    #[test]
    fn test_empty_slot_commands_need_credential() {
        let (_, mut r) = responder_with(None);
        let commands = [
            vec![0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00, 0x00],
            vec![0x00, 0xB2, 0x01, 0x0C, 0x00],
            vec![0x80, 0xAE, 0x80, 0x00, 0x06, 0, 0, 0, 0, 0x03, 0xE8, 0x00],
            // Malformed but still refused for the missing credential
            vec![0x80, 0xAE, 0x80, 0x00, 0x09, 0x01],
        ];
        for cmd in commands {
            assert_eq!(r.process_apdu(&cmd), vec![0x69, 0x85], "cmd {}", hexify(&cmd));
        }
    }

    #[test]
    fn test_expired_credential_refused() {
        let mut payload = sample_payload(Scheme::Visa, 0);
        payload.expires_at = Utc::now() - Duration::seconds(5);
        let (_, mut r) = responder_with(Some(payload));
        assert_eq!(r.process_apdu(&[0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00]), vec![0x69, 0x85]);
    }

    #[test]
    fn test_expired_credential_allowed_when_configured() {
        let mut payload = sample_payload(Scheme::Visa, 0);
        payload.expires_at = Utc::now() - Duration::seconds(5);
        let slot = Arc::new(ActiveTokenSlot::new());
        slot.set(payload);
        let config = ResponderConfig {
            reject_expired: false,
            ..ResponderConfig::default()
        };
        let mut r = PaymentResponder::with_config(slot, config);
        let resp = r.process_apdu(&[0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00]);
        assert_eq!(sw(&resp), SW::SUCCESS);
    }

    #[test]
    fn test_gpo_response() {
        let (_, mut r) = responder_with(Some(sample_payload(Scheme::Visa, 0)));
        let resp = r.process_apdu(&[0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00, 0x00]);
        assert_eq!(resp, vec![0x80, 0x06, 0x08, 0x80, 0x08, 0x01, 0x01, 0x01, 0x90, 0x00]);
        assert_eq!(r.state(), TapState::GpoDone);
    }

    #[test]
    fn test_read_record() {
        let (_, mut r) = responder_with(Some(sample_payload(Scheme::Visa, 0x0A)));
        let resp = r.process_apdu(&[0x00, 0xB2, 0x01, 0x0C, 0x00]);
        assert_eq!(sw(&resp), SW::SUCCESS);
        let tlvs = read_list(data(&resp), true);
        assert_eq!(find_in(&tlvs, tags::PAN).unwrap().value, hex::decode("4000000000001234").unwrap());
        assert_eq!(find_in(&tlvs, tags::EXPIRY_DATE).unwrap().value, vec![0x28, 0x02, 0x29]);
        assert_eq!(find_in(&tlvs, tags::ATC).unwrap().value, vec![0x00, 0x0A]);
        assert_eq!(find_in(&tlvs, tags::CRYPTOGRAM_INFO).unwrap().value, vec![0x80]);
    }

    #[test]
    fn test_read_record_bad_dpan() {
        let mut payload = sample_payload(Scheme::Visa, 0);
        payload.dpan = "4000-0000".to_string();
        let (_, mut r) = responder_with(Some(payload));
        assert_eq!(r.process_apdu(&[0x00, 0xB2, 0x01, 0x0C, 0x00]), vec![0x6F, 0x00]);
    }

    #[test]
    fn test_generate_ac_cryptogram() {
        let payload = sample_payload(Scheme::Visa, 3);
        let (_, mut r) = responder_with(Some(payload.clone()));
        let cdol = vec![0, 0, 0, 0, 0x03, 0xE8, 0x09, 0x78, 0x12, 0x34, 0x56, 0x78];
        let cmd = APDU::with_data(0x80, ins::GENERATE_AC, 0x80, 0x00, cdol.clone()).expect(256);
        let resp = r.process_apdu(&cmd.to_bytes());
        assert_eq!(sw(&resp), SW::SUCCESS);

        let expected = generate_cryptogram(&payload.session_key, 3, 1000, &cdol).unwrap();
        let tlvs = read_list(data(&resp), true);
        assert_eq!(tlvs[0].tag, tags::RESPONSE_FORMAT_2);
        assert_eq!(find_in(&tlvs, tags::APPLICATION_CRYPTOGRAM).unwrap().value, expected.to_vec());
        assert_eq!(find_in(&tlvs, tags::ATC).unwrap().value, vec![0x00, 0x03]);

        // Reading does not advance the counter
        assert_eq!(r.slot.get().unwrap().atc, 3);
    }

    #[test]
    fn test_generate_ac_short_data_uses_zero_amount() {
        let payload = sample_payload(Scheme::Mastercard, 1);
        let (_, mut r) = responder_with(Some(payload.clone()));
        let resp = r.process_apdu(&[0x80, 0xAE, 0x80, 0x00, 0x02, 0x09, 0x78]);
        let expected = generate_cryptogram(&payload.session_key, 1, 0, &[0x09, 0x78]).unwrap();
        let tlvs = read_list(data(&resp), true);
        assert_eq!(find_in(&tlvs, tags::APPLICATION_CRYPTOGRAM).unwrap().value, expected.to_vec());
    }

    #[test]
    fn test_generate_ac_bad_session_key() {
        let mut payload = sample_payload(Scheme::Visa, 1);
        payload.session_key = "xyz".to_string();
        let (_, mut r) = responder_with(Some(payload));
        assert_eq!(r.process_apdu(&[0x80, 0xAE, 0x80, 0x00]), vec![0x6F, 0x00]);
    }

    #[test]
    fn test_unknown_instruction_and_short_input() {
        let (_, mut r) = responder_with(Some(sample_payload(Scheme::Visa, 0)));
        assert_eq!(r.process_apdu(&[0x80, 0xCA, 0x9F, 0x36, 0x00]), vec![0x6A, 0x82]);
        assert_eq!(r.process_apdu(&[0x00, 0xA4, 0x04]), vec![0x6F, 0x00]);
        assert_eq!(r.process_apdu(&[]), vec![0x6F, 0x00]);
    }

    #[test]
    fn test_malformed_select_is_wrong_length() {
        let (_, mut r) = responder_with(None);
        assert_eq!(r.process_apdu(&[0x00, 0xA4, 0x04, 0x00, 0x0E, 0x32, 0x50]), vec![0x67, 0x00]);
    }

    #[test]
    fn test_every_response_ends_with_cataloged_sw() {
        let (_, mut r) = responder_with(Some(sample_payload(Scheme::Visa, 0)));
        for code in 0..=255u8 {
            let resp = r.process_apdu(&[0x80, code, 0x00, 0x00]);
            assert!(SW::ALL.contains(&sw(&resp)), "INS {code:02X}");
        }
    }

    #[test]
    fn test_deactivation_clears_selection_not_slot() {
        let (slot, mut r) = responder_with(Some(sample_payload(Scheme::Visa, 0)));
        r.process_apdu(&select(&AID_VISA));
        assert!(r.selected_aid().is_some());

        r.on_deactivated(DeactivationReason::from_code(0));
        assert!(r.selected_aid().is_none());
        assert_eq!(r.state(), TapState::Idle);
        assert!(slot.is_ready());
    }

    #[test]
    fn test_deactivation_reason_codes() {
        assert_eq!(DeactivationReason::from_code(0), DeactivationReason::LinkLoss);
        assert_eq!(DeactivationReason::from_code(1), DeactivationReason::Deselected);
        assert_eq!(DeactivationReason::from_code(7), DeactivationReason::Other(7));
    }

    #[test]
    fn test_app_writes_between_commands() {
        let (slot, mut r) = responder_with(None);
        assert_eq!(r.process_apdu(&[0x00, 0xB2, 0x01, 0x0C, 0x00]), vec![0x69, 0x85]);
        slot.set(sample_payload(Scheme::Visa, 0));
        assert_eq!(sw(&r.process_apdu(&[0x00, 0xB2, 0x01, 0x0C, 0x00])), SW::SUCCESS);
        slot.clear();
        assert_eq!(r.process_apdu(&[0x00, 0xB2, 0x01, 0x0C, 0x00]), vec![0x69, 0x85]);
    }
}
