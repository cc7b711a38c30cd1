//! Wire-level EAP-AKA exchange between an authenticator and a simulated peer

use eap_proto::{
    verify_mac, AkaAttribute, AkaKeys, AkaMessage, AkaSubtype, EapCode, EapPacket, EapType,
};

const IDENTITY: &str = "0001010000000001@wlan.mnc001.mcc001.3gppnetwork.org";

fn vector_keys() -> AkaKeys {
    let ik = hex::decode("f769bcd751044604127672711c6d3441").unwrap();
    let ck = hex::decode("b40ba9a3c58b2a05bbf0d987b21bf8cb").unwrap();
    AkaKeys::derive(IDENTITY.as_bytes(), &ik, &ck)
}

#[test]
fn test_challenge_and_response_over_the_wire() {
    let keys = vector_keys();
    let rand = [0x23; 16];
    let autn = [0x55; 16];
    let xres = hex::decode("a54211d5e3ba50bf").unwrap();

    // Authenticator side
    let challenge = AkaMessage::new(AkaSubtype::Challenge)
        .with_attribute(AkaAttribute::rand(&rand))
        .with_attribute(AkaAttribute::autn(&autn))
        .seal(EapCode::Request, 1, &keys.k_aut)
        .unwrap();
    let wire = challenge.to_bytes().unwrap();

    // Peer side: decode, check the MAC, answer with RES
    let received = EapPacket::from_bytes(&wire).unwrap();
    assert_eq!(received.eap_type, Some(EapType::Aka));
    assert!(verify_mac(&received, &keys.k_aut).unwrap());

    let message = AkaMessage::from_packet(&received).unwrap();
    assert_eq!(message.subtype, AkaSubtype::Challenge);
    assert_eq!(message.rand(), Some(rand));
    assert_eq!(message.autn(), Some(autn));

    let response = AkaMessage::new(AkaSubtype::Challenge)
        .with_attribute(AkaAttribute::res(&xres).unwrap())
        .seal(EapCode::Response, received.identifier, &keys.k_aut)
        .unwrap();
    let wire = response.to_bytes().unwrap();

    // Authenticator side again
    let received = EapPacket::from_bytes(&wire).unwrap();
    assert_eq!(received.identifier, 1);
    assert!(verify_mac(&received, &keys.k_aut).unwrap());
    let message = AkaMessage::from_packet(&received).unwrap();
    assert_eq!(message.res(), Some(xres.as_slice()));
}

#[test]
fn test_response_sealed_with_wrong_key_fails_verification() {
    let keys = vector_keys();
    let other = AkaKeys::derive(b"someone-else", &[0; 16], &[0; 16]);

    let response = AkaMessage::new(AkaSubtype::Challenge)
        .with_attribute(AkaAttribute::res(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap())
        .seal(EapCode::Response, 1, &other.k_aut)
        .unwrap();

    assert!(!verify_mac(&response, &keys.k_aut).unwrap());
}

#[test]
fn test_truncated_aka_payload_is_rejected() {
    let challenge = AkaMessage::new(AkaSubtype::Challenge)
        .with_attribute(AkaAttribute::rand(&[0x23; 16]))
        .to_packet(EapCode::Request, 1);

    let mut truncated = challenge.clone();
    truncated.data.truncate(10);
    let wire = truncated.to_bytes().unwrap();

    // The EAP layer is fine with it, the AKA layer is not
    let packet = EapPacket::from_bytes(&wire).unwrap();
    assert!(AkaMessage::from_packet(&packet).is_err());
}
