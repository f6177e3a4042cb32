//! Capture page served to the capture surface
//!
//! The page defines `run(peerIdentity)`. It expects the surface to have
//! installed three bridge functions before `run` is evaluated:
//! `logErr(message)`, `logInfo(message)` and `getAnswer(offer)`, the last one
//! returning a promise for the answer or `null` when negotiation failed on
//! the host side.

/// HTML body served under the endpoint's random path
pub const CAPTURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Screen capture</title>
</head>
<body>
<script>
function describe(err) {
  if (err && err.name && err.message) return err.name + ': ' + err.message;
  return String(err);
}

function iceGatheringComplete(pc) {
  if (pc.iceGatheringState === 'complete') return Promise.resolve();
  return new Promise(function (resolve) {
    pc.addEventListener('icegatheringstatechange', function check() {
      if (pc.iceGatheringState === 'complete') {
        pc.removeEventListener('icegatheringstatechange', check);
        resolve();
      }
    });
  });
}

async function run(peerIdentity) {
  try {
    const stream = await navigator.mediaDevices.getDisplayMedia({ video: true, audio: false });
    const pc = new RTCPeerConnection({ peerIdentity: peerIdentity });
    pc.addEventListener('iceconnectionstatechange', function () {
      logInfo('Browser ICE state: ' + pc.iceConnectionState);
    });
    stream.getTracks().forEach(function (track) {
      pc.addTrack(track, stream);
    });

    await pc.setLocalDescription(await pc.createOffer());
    await iceGatheringComplete(pc);

    const answer = await getAnswer({ type: pc.localDescription.type, sdp: pc.localDescription.sdp });
    if (!answer) return;
    await pc.setRemoteDescription(answer);
    window.capturePeer = pc;
  } catch (err) {
    logErr(describe(err));
  }
}
</script>
</body>
</html>
"#;
