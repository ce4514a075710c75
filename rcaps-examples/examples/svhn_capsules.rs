use rand::SeedableRng;
use rand::rngs::StdRng;
use rcaps::caps::RoutingParams;
use rcaps::conv::Padding;
use rcaps::data::Split;
use rcaps::initializer::RandomInitializer;
use rcaps::model::{CapsuleModel, CapsuleModelParams};
use rcaps::tensor::{Dim3, ITensor, TensorView};
use rcaps::visual::{Diagnostics, chw_to_hwc, standardize_image, to_rgb_bytes};
use rcaps_examples::util::{max_index, synthetic_svhn_data};
use std::time::Instant;

const BATCH_SIZE: usize = 16;

pub fn main() {
    let mut data_rng = StdRng::seed_from_u64(0xf666);
    let data = synthetic_svhn_data(256, &mut data_rng);
    let batches = data.batches::<f32, _>(Split::Test, BATCH_SIZE, &mut data_rng);

    // default geometry scaled down so an untrained forward pass stays quick
    let params = CapsuleModelParams {
        conv_channels: 32,
        num_prime_capsules: 8,
        routing: RoutingParams {
            iterations: 3,
            leaky: true,
        },
        padding: Padding::Same,
        ..CapsuleModelParams::default()
    };
    let mut initializer = RandomInitializer::seed_from_u64(0xf1234567);
    let model: CapsuleModel<f32> = CapsuleModel::new(params, &mut initializer);
    println!(
        "primary capsule grid: {:?}, batches: {}",
        model.prime_grid(),
        batches.len()
    );

    let start = Instant::now();
    let mut correct = 0usize;
    let mut total = 0usize;
    for batch in &batches {
        let logits = model.forward(&batch.images, None);
        let classes = logits.dims().cols();
        for (predicted, label) in logits
            .as_ref()
            .chunks_exact(classes)
            .zip(batch.labels.as_ref().chunks_exact(classes))
        {
            if max_index(predicted) == max_index(label) {
                correct += 1;
            }
            total += 1;
        }
    }
    let elapsed = start.elapsed();
    println!(
        "forward pass over {total} images with batch size {BATCH_SIZE}: {} sec",
        elapsed.as_secs_f32()
    );
    println!("untrained accuracy: {:.1}%", 100.0 * correct as f32 / total as f32);

    // capture intermediate tensors for one batch and render the first conv
    // channel as an image
    let mut diag = Diagnostics::new();
    model.forward(&batches[0].images, Some(&mut diag));
    println!("captured {} tensor snapshots:", diag.len());
    for record in diag.iter() {
        println!("  {} {:?}", record.name, record.dims);
    }

    let conv = diag.get("conv1/preactivation").unwrap();
    let (height, width) = (conv.dims[2], conv.dims[3]);
    let channel = TensorView::from_slice(&conv.data[..height * width], Dim3(1, height, width));
    let rgb = to_rgb_bytes(&chw_to_hwc(&standardize_image(&channel, 0.1)));
    println!("rendered {}x{} visualization ({} bytes)", width, height, rgb.len());
}
