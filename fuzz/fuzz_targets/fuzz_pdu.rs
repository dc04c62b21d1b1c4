#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(pdu) = eapol_proxy::pdu::EapolPdu::parse(data) {
        let _ = pdu.to_string();
    }
});
