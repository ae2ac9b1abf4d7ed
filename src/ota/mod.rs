/// Firmware-update collaborator. The control loop calls `service` once
/// per iteration; implementations do a bounded slice of work and
/// return, they never block the frame path.
pub trait OtaService {
    fn service(&mut self);
}

/// Stand-in for deployments without an updater attached.
#[derive(Default)]
pub struct NoopOta;

impl OtaService for NoopOta {
    fn service(&mut self) {}
}
