use anyhow::Result;
use approx::assert_relative_eq;
use perceptron::{
    ActivationType, LabelEncoder, Layer, LayerConfig, LearningRateSchedule, LossType, Network,
    NetworkConfig, NetworkSnapshot, Sample, TrainingMode,
};

fn or_samples() -> Vec<Sample> {
    vec![
        Sample::new(vec![0.0, 0.0], 0),
        Sample::new(vec![0.0, 1.0], 1),
        Sample::new(vec![1.0, 0.0], 1),
        Sample::new(vec![1.0, 1.0], 1),
    ]
}

fn binary_encoder() -> LabelEncoder {
    LabelEncoder::new(|label| vec![if label == 0 { 0.0 } else { 1.0 }])
}

fn or_network(seed: u64) -> Result<Network> {
    let mut config = NetworkConfig::new(
        2,
        vec![
            LayerConfig::new(4, ActivationType::Sigmoid),
            LayerConfig::new(1, ActivationType::Sigmoid),
        ],
        LossType::Mse,
        0.5,
        1000,
    );
    config.seed = Some(seed);
    Ok(Network::new(&config, binary_encoder(), LearningRateSchedule::constant())?)
}

fn accuracy(network: &Network, samples: &[Sample]) -> f64 {
    let correct = samples
        .iter()
        .filter(|sample| {
            network
                .classify(&sample.input)
                .map(|prediction| (prediction[0] >= 0.5) == (sample.label == 1))
                .unwrap_or(false)
        })
        .count();
    correct as f64 / samples.len() as f64
}

#[test]
fn test_pinned_weights_scenario() -> Result<()> {
    let hidden = Layer::from_weights(vec![vec![0.5; 3]; 2], ActivationType::Sigmoid, 0.1, None)?;
    let output = Layer::from_weights(vec![vec![0.5; 3]], ActivationType::Sigmoid, 0.1, None)?;
    let mut network = Network::from_layers(
        vec![hidden, output],
        LossType::Mse,
        binary_encoder(),
        LearningRateSchedule::constant(),
    )?;

    let prediction = network.classify(&[1.0, -1.0])?;
    assert_eq!(format!("{:.6}", prediction[0]), "0.754445");

    // one online step towards target 1 must raise the prediction
    network.train_sample(&Sample::new(vec![1.0, -1.0], 1))?;
    let hidden_units = network.layers()[0].units();
    assert_relative_eq!(hidden_units[0].output(), 0.6224593312018546, epsilon = 1e-12);
    assert!(network.classify(&[1.0, -1.0])?[0] > prediction[0]);
    Ok(())
}

#[test]
fn test_online_training_learns_or() -> Result<()> {
    let samples = or_samples();
    let mut network = or_network(7)?.with_acceptable_accuracy(1.0);
    let summary = network.train(&samples, TrainingMode::Online, |network, _| accuracy(network, &samples))?;

    assert!(summary.reached_target, "accuracy history: {:?}", summary.accuracies);
    assert_eq!(accuracy(&network, &samples), 1.0);
    if summary.epochs_run > 1 {
        assert!(summary.losses.first() > summary.losses.last());
    }
    Ok(())
}

fn summed_loss(network: &Network, samples: &[Sample]) -> perceptron::Result<f64> {
    samples.iter().map(|sample| network.sample_loss(sample)).sum()
}

#[test]
fn test_mini_batch_training_lowers_loss() -> Result<()> {
    let samples = or_samples();
    let mut network = or_network(11)?.with_max_epochs(300);
    let before = summed_loss(&network, &samples)?;
    let summary = network.train(&samples, TrainingMode::Batch { batch_size: 2 }, |_, _| 0.0)?;
    let after = summed_loss(&network, &samples)?;

    assert_eq!(summary.epochs_run, 300);
    assert!(after < before, "loss went from {before} to {after}");
    Ok(())
}

#[test]
fn test_batch_normalized_training_lowers_epoch_loss() -> Result<()> {
    let samples = or_samples();
    let mode = TrainingMode::BatchNormalized { batch_size: 4 };
    let mut network = or_network(5)?;

    let first = network.train_one_epoch(&samples, mode)?;
    let mut last = first;
    for _ in 0..300 {
        last = network.train_one_epoch(&samples, mode)?;
    }

    assert_eq!(first.updates, 1);
    assert!(last.mean_loss.is_finite());
    assert!(
        last.mean_loss < first.mean_loss,
        "epoch loss went from {} to {}",
        first.mean_loss,
        last.mean_loss
    );
    assert!(network.running_statistics(0).is_some());
    Ok(())
}

#[test]
fn test_trained_network_survives_snapshot() -> Result<()> {
    let samples = or_samples();
    let mut network = or_network(3)?.with_max_epochs(20);
    network.train(&samples, TrainingMode::BatchNormalized { batch_size: 2 }, |_, _| 0.0)?;

    let json = network.to_snapshot().to_json()?;
    let rebuilt = Network::from_snapshot(
        &NetworkSnapshot::from_json(&json)?,
        LossType::Mse,
        binary_encoder(),
        LearningRateSchedule::constant(),
    )?;
    for sample in &samples {
        assert_eq!(rebuilt.classify(&sample.input)?, network.classify(&sample.input)?);
    }
    Ok(())
}
