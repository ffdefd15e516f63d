mod deprovisioning;
mod lifecycle;
mod provisioning;
mod recovery;
